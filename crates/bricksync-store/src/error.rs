//! Error types for store operations.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error variants for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested path does not exist (or its lease expired).
    #[error("key not found: {0}")]
    NotFound(String),

    /// A create-only write hit an existing key.
    #[error("key already exists: {0}")]
    AlreadyExists(String),

    /// A non-blocking lock attempt found the lock held by another owner.
    #[error("lock at {0} held by another owner")]
    LockHeld(String),

    /// The store backend could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// True for the absence signal that callers treat as "no prior value".
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
