//! Storage error types.

use crate::ContentHash;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A string is not a 40-character hex SHA-1.
    #[error("invalid content hash: {0}")]
    InvalidHash(String),

    /// A standin record could not be parsed.
    #[error("{path}: malformed standin: {detail}")]
    MalformedStandin {
        /// Standin that failed to parse.
        path: String,
        /// What was wrong with it.
        detail: String,
    },

    /// Content did not hash to the expected value.
    #[error("data corruption in {}: expected {expected}, got {actual}", path.display())]
    Corruption {
        /// File whose content was checked.
        path: PathBuf,
        /// Hash the content should have had.
        expected: ContentHash,
        /// Hash the content actually had.
        actual: ContentHash,
    },

    /// The shadow ledger could not be read or written.
    #[error("shadow ledger error: {0}")]
    Ledger(String),

    /// Another process holds the repository lock.
    #[error("repository is locked by {holder} ({})", path.display())]
    LockHeld {
        /// Lock file path.
        path: PathBuf,
        /// Who holds the lock, usually the holder's pid.
        holder: String,
    },

    /// No system cache location is configured and none could be derived.
    #[error("no system cache directory configured and no home directory found")]
    NoSystemCache,
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Ledger(err.to_string())
    }
}
