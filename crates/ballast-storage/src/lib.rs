//! Content-addressed storage for Ballast.
//!
//! Big-file content is identified by the SHA-1 of its bytes. This crate
//! provides the hash type and streaming hashers, the standin codec that
//! stands in for a big file in history, the two-tier local cache (per
//! repository and per user), the shadow ledger that tracks working-copy big
//! files, and the repository lock that serializes ledger updates.

mod cache;
mod error;
mod hash;
mod ledger;
mod lock;
pub mod standin;

pub use cache::{default_system_cache_dir, CacheHierarchy, CacheTier, PromoteOutcome};
pub use error::StorageError;
pub use hash::{
    copy_and_hash, copy_and_hash_async, hash_file, hash_reader, ContentHash, ContentHasher,
    BLOCK_SIZE,
};
pub use ledger::{EntryState, LedgerEntry, LedgerStatus, ShadowLedger};
pub use lock::RepoLock;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
