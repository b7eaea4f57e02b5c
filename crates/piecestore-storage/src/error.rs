//! Error type for storage operations.

use piecestore_common::Error as CommonError;

/// Error type for piece store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("store is closed")]
    Closed,
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Common(CommonError::Io(e))
    }
}

impl StoreError {
    /// Whether the failed transaction may succeed if the caller retries it.
    ///
    /// Nothing is retried inside the store; this only classifies.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(_) | Self::Transaction(_) | Self::Commit(_) => true,
            Self::Redb(e) => matches!(e, redb::DatabaseError::DatabaseAlreadyOpen),
            Self::Common(e) => e.is_retryable(),
            Self::Table(_) | Self::Closed => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
