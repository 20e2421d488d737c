//! Error types for the reconciliation engine.

use thiserror::Error;

use bricksync_store::StoreError;

/// Result type alias for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Error variants for one reconciliation cycle.
///
/// None of these are fatal: the loop converts every error that escapes a
/// cycle into an error event and proceeds to the next tick.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Shared-store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A stored record did not parse as the expected entity.
    #[error("malformed record at {path}: {reason}")]
    MalformedRecord {
        /// Store path of the offending record.
        path: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// Record serialization failed.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The fact source could not produce a snapshot.
    #[error("fact snapshot failed: {0}")]
    FactSource(String),

    /// An external command could not be spawned or awaited.
    #[error("command failed: {0}")]
    Command(String),

    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
