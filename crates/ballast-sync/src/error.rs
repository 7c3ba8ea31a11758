//! Error types for sync operations.

use thiserror::Error;

/// Errors that can occur while synchronizing a working copy.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local storage error, including lock contention and bad standins.
    #[error(transparent)]
    Storage(#[from] ballast_storage::StorageError),

    /// Store error.
    #[error(transparent)]
    Store(#[from] ballast_store::StoreError),

    /// Host repository error.
    #[error(transparent)]
    Host(#[from] ballast_types::HostError),

    /// A path given to add or remove is not usable as a big file.
    #[error("{path}: {reason}")]
    InvalidPath {
        /// Path as given.
        path: String,
        /// Why it was refused.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
