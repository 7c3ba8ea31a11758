//! Ballast wire protocol.
//!
//! Big-file content moves between clients and servers with three commands
//! keyed by content hash: `putbfile`, `getbfile`, and `statbfile`. Servers
//! advertise support through a capability token so clients can pick a
//! backend before sending anything.
//!
//! Over HTTP the commands are query parameters on the repository URL. Over
//! a byte pipe (an ssh session, or a child process in tests) requests and
//! responses are framed as pkt-lines; see [`stdio`].

mod commands;
mod error;
mod framing;
mod handlers;
mod http_api;
mod pktline;
pub mod stdio;

pub use commands::{
    Capabilities, PushStatus, StatStatus, WireCommand, SHA_ARG, STORE_CAPABILITY,
};
pub use error::ProtoError;
pub use framing::{length_line, read_length_line};
pub use handlers::WireHandler;
pub use http_api::{CONTENT_SHA1_HEADER, SHA1_REQUEST_HEADER, STORE_HEADER};
pub use pktline::{PktLine, PktLineReader, PktLineWriter, MAX_DATA_LEN};

/// Result type for wire protocol operations.
pub type Result<T> = std::result::Result<T, ProtoError>;
