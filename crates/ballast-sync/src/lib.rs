//! Working-copy synchronization for Ballast.
//!
//! The host version-control system moves standins around; these operations
//! keep the big files they stand for in step:
//!
//! - [`reconcile_checkout`] after the host updates the working copy
//! - [`refresh_standins`] before the host commits, [`record_committed`] after
//! - [`upload_before_push`] before the host pushes
//! - [`verify_bigfiles`] on demand
//!
//! [`BigFileTracker`] ties a working copy's layout, its host ledger, and its
//! cache together, and owns the shadow ledger. Operations that change the
//! shadow ledger hold the repository lock while they run.

mod checkout;
mod commit;
mod error;
mod push;
mod tracker;
mod verify;

pub use checkout::{reconcile_checkout, UpdateSummary};
pub use commit::{record_committed, refresh_standins, CommitRefresh};
pub use error::SyncError;
pub use push::{outgoing_hashes, upload_before_push, OutgoingFile, UploadSummary};
pub use tracker::{BigFileStatus, BigFileTracker};
pub use verify::verify_bigfiles;

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
