//! Remote big-file stores for Ballast.
//!
//! A store holds big-file content keyed by hash, outside the history. Three
//! backends implement the same [`StoreBackend`] contract:
//!
//! - [`LocalStore`] for `file` URLs and bare paths, backed by the system cache
//! - [`HttpApiStore`] for servers exposing `<base>/bfile/<hash>`
//! - [`WireStore`] for servers speaking the wire protocol, over HTTP or ssh
//!
//! [`StoreOpener`] picks a backend for a URL by probing candidates in order.
//! [`BigFileStore`] wraps the chosen backend with the batched download,
//! idempotent upload, and verification operations the sync layer uses.

mod backend;
mod bigfile_store;
mod config;
mod error;
mod http;
mod local;
mod open;
pub mod transport;
mod wire;

pub use backend::{BackendKind, PutOutcome, StoreBackend};
pub use bigfile_store::{
    BigFileStore, FailureKind, FetchRequest, GetOutcome, VerifyFailure, VerifyReport,
};
pub use config::{HttpConfig, SshConfig, StoreConfig};
pub use error::{StoreError, TransferError};
pub use http::HttpApiStore;
pub use local::LocalStore;
pub use open::{split_scheme, Direction, Probe, StoreOpener, StoreSource};
pub use wire::WireStore;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
