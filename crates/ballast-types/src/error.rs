//! Host error types.

use thiserror::Error;

/// Errors reported by the host version-control system.
#[derive(Debug, Error)]
pub enum HostError {
    /// The requested revision does not exist.
    #[error("unknown revision: {0}")]
    UnknownRevision(String),

    /// The host failed to answer a query.
    #[error("host repository error: {0}")]
    Backend(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
