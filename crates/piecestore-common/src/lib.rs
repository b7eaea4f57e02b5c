//! PieceStore Common - Shared types and configuration
//!
//! This crate provides the identifiers, configuration structures and error
//! definitions shared by the storage engine and the CLI.

pub mod config;
pub mod error;
pub mod types;

pub use config::{CapacityConfig, MIN_THRESHOLD_BYTES, StoreConfig, SyncMode};
pub use error::{Error, Result};
pub use types::*;
