//! Error types for PieceStore
//!
//! This module defines the error types shared by every PieceStore crate.
//! Backend-specific failures live in `piecestore-storage`.

use thiserror::Error;

/// Common result type for PieceStore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for PieceStore
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid info hash: {0}")]
    InvalidInfoHash(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("range out of piece bounds: offset {offset} + {len} bytes exceeds piece length {piece_length}")]
    OutOfBounds {
        offset: u64,
        len: usize,
        piece_length: u64,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    /// The 32-bit sequence space is used up; keys would wrap and lose ordering.
    #[error("sequence keys exhausted: last issued key is {last:#010x}")]
    SequenceExhausted { last: u32 },
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if the caller may retry the failed operation unchanged
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
