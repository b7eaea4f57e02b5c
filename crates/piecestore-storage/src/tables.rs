//! Redb table definitions for the two tables a store file holds.

use redb::TableDefinition;

/// Content: chunk key (info hash ‖ piece index ‖ chunk index) → chunk bytes
pub const CONTENT: TableDefinition<&[u8], &[u8]> = TableDefinition::new("content");

/// Sequence: big-endian sequence key → piece prefix (info hash ‖ piece index)
pub const SEQUENCE: TableDefinition<&[u8; 4], &[u8]> = TableDefinition::new("sequence");
