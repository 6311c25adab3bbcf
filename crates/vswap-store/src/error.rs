//! Store error types.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by a `MarketStore`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A record the operation requires does not exist.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A record that must not exist already does (pair lock, rating, hash).
    #[error("Record already exists: {0}")]
    Conflict(String),

    /// A version precondition failed; the caller should re-read and retry.
    #[error("Concurrent modification: {0}")]
    Contention(String),

    /// The backing store failed.
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn is_contention(&self) -> bool {
        matches!(self, StoreError::Contention(_))
    }
}
