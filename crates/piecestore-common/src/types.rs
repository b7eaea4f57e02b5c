//! Core type definitions for PieceStore
//!
//! This module defines the identifiers and size constants used by the
//! storage engine: object info hashes, piece descriptors and sequence keys.

use crate::error::{Error, Result};
use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Storage I/O granularity. Matches the usual block size requested by the
/// transfer engine, so most writes replace exactly one stored record.
pub const CHUNK_SIZE: usize = 1 << 14;

/// Length of an object identifier in bytes
pub const INFO_HASH_LEN: usize = 20;

/// Largest number of chunks a single piece may span (chunk index is a u16).
pub const MAX_CHUNKS_PER_PIECE: u64 = 1 << 16;

/// Largest piece length the key layout can address
pub const MAX_PIECE_LENGTH: u64 = MAX_CHUNKS_PER_PIECE * CHUNK_SIZE as u64;

/// Zero-based index of a piece within an object
pub type PieceIndex = u32;

/// Fixed-length identifier of a stored object
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into)]
pub struct InfoHash([u8; INFO_HASH_LEN]);

impl InfoHash {
    /// Create from raw bytes
    #[must_use]
    pub const fn new(bytes: [u8; INFO_HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Create from a byte slice, which must be exactly 20 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; INFO_HASH_LEN] = bytes.try_into().map_err(|_| {
            Error::InvalidInfoHash(format!(
                "expected {INFO_HASH_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Get as bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; INFO_HASH_LEN] {
        &self.0
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", hex::encode(self.0))
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for InfoHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidInfoHash(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

/// Descriptor of one piece, as handed over by the transfer engine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PieceInfo {
    /// Index of the piece within its object
    pub index: PieceIndex,
    /// Length of the piece in bytes (the last piece of an object may be short)
    pub length: u64,
}

impl PieceInfo {
    /// Create a piece descriptor, rejecting lengths the key layout cannot address
    pub fn new(index: PieceIndex, length: u64) -> Result<Self> {
        if length > MAX_PIECE_LENGTH {
            return Err(Error::invalid_argument(format!(
                "piece length {length} exceeds maximum {MAX_PIECE_LENGTH}"
            )));
        }
        Ok(Self { index, length })
    }

    /// Number of chunks needed to hold the piece
    #[must_use]
    pub const fn chunk_count(&self) -> u64 {
        self.length.div_ceil(CHUNK_SIZE as u64)
    }

    /// Length of the chunk at `chunk_index` when the piece is complete
    #[must_use]
    pub fn chunk_length(&self, chunk_index: u64) -> usize {
        let start = chunk_index * CHUNK_SIZE as u64;
        let remaining = self.length.saturating_sub(start);
        usize::try_from(remaining.min(CHUNK_SIZE as u64)).unwrap_or(CHUNK_SIZE)
    }
}

/// Monotonic 4-byte key recording the order in which pieces were first written
///
/// Keys compare as unsigned integers; the on-disk form is big-endian so byte
/// order and numeric order agree.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Display, From, Into, Serialize, Deserialize,
)]
#[display("{_0:08x}")]
pub struct SequenceKey(u32);

impl SequenceKey {
    /// Create from a raw counter value
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the counter value
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Big-endian byte form used as the sequence table key
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Parse the big-endian byte form
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }
}
