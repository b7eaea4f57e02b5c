//! PieceStore Storage Engine - chunked piece persistence in redb
//!
//! This crate implements the storage backend a transfer engine writes
//! object pieces into:
//! - Chunk store: per-object, per-piece chunk reads and writes, one redb
//!   transaction per operation
//! - Sequence index: a monotonic key stamped on the first write of every
//!   piece, recording the order in which content arrived
//! - Capacity enforcement: a background daemon that evicts the oldest
//!   pieces once stored content exceeds the configured threshold

pub mod daemon;
pub mod error;
pub mod eviction;
pub mod keys;
pub mod sequence;
pub mod store;
pub mod tables;

// Re-exports
pub use daemon::{CapacityDaemon, DaemonStats};
pub use error::{StoreError, StoreResult};
pub use eviction::EvictionReport;
pub use keys::{ChunkKey, ContentKey};
pub use sequence::SequenceGenerator;
pub use store::{ObjectHandle, PieceHandle, PieceStore, SequenceRecord, StoreStats};
