//! Wire protocol error types.

use ballast_storage::ContentHash;
use thiserror::Error;

/// Errors that can occur during wire protocol operations.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Invalid pkt-line format.
    #[error("invalid pkt-line: {0}")]
    InvalidPktLine(String),

    /// The peer sent something the protocol does not allow.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The command name is not part of the protocol.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A required command argument was not sent.
    #[error("{command}: missing argument '{name}'")]
    MissingArgument {
        /// Command that was called.
        command: String,
        /// Name of the missing argument.
        name: String,
    },

    /// No cache tier holds the requested content.
    #[error("not found: {0}")]
    NotFound(ContentHash),

    /// The peer reported an error.
    #[error("remote error: {0}")]
    Remote(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] ballast_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
