//! Common types used throughout `ballast`.
//!
//! Ballast keeps large binary files out of version-control history. History
//! only records a small standin per big file; the content lives in a
//! content-addressed cache hierarchy and a remote store. This crate holds the
//! seams between ballast and the host version-control system: read access to
//! history, the host's own file-tracking ledger, path matchers, the on-disk
//! repository layout, and progress reporting.

mod dirstate;
mod error;
mod history;
mod layout;
mod matcher;
mod progress;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use dirstate::{HostDirstate, HostState};
pub use error::HostError;
pub use history::{FileNodeId, History, Manifest, RevisionId};
pub use layout::RepoLayout;
pub use matcher::{AlwaysMatcher, ExactMatcher, Matcher};
pub use progress::{Progress, ProgressCallback, ProgressPhase, ProgressUpdate};

/// Result type for host operations.
pub type Result<T> = std::result::Result<T, HostError>;
