//! Store error types.

use ballast_storage::ContentHash;
use thiserror::Error;

/// A single file failed to transfer.
///
/// Transfer errors are isolated to the file they concern: a batch keeps
/// going and reports the file as missing.
#[derive(Debug, Clone, Error)]
#[error("{file}: {detail}")]
pub struct TransferError {
    /// Big file being transferred.
    pub file: String,
    /// Content hash being transferred.
    pub hash: ContentHash,
    /// Store URL.
    pub url: String,
    /// What went wrong.
    pub detail: String,
}

impl TransferError {
    /// Creates a transfer error.
    pub fn new(
        file: impl Into<String>,
        hash: ContentHash,
        url: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            hash,
            url: url.into(),
            detail: detail.into(),
        }
    }

    /// The full diagnostic, naming hash, store, and file.
    pub fn long_message(&self) -> String {
        format!(
            "error getting {} from {} for {}: {}",
            self.hash, self.url, self.file, self.detail
        )
    }
}

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// One file failed to transfer.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Downloaded content hashed to something other than requested.
    #[error("{file}: data corruption (expected {expected}, got {actual})")]
    ContentMismatch {
        /// Big file being downloaded.
        file: String,
        /// Requested hash.
        expected: ContentHash,
        /// Hash of what arrived.
        actual: ContentHash,
    },

    /// The URL scheme has no backend.
    #[error("unsupported URL scheme {0:?}")]
    UnsupportedScheme(String),

    /// The remote does not advertise big-file store support.
    #[error("{url} does not advertise big-file store support")]
    CapabilityNotSupported {
        /// Store URL.
        url: String,
    },

    /// No backend accepted the URL.
    #[error("{url} does not appear to be a big-file store")]
    NotAStore {
        /// Store URL.
        url: String,
    },

    /// Content must be uploaded but no local tier holds it.
    #[error("missing big file {0} needs to be uploaded")]
    MissingContent(ContentHash),

    /// No URL was given and none is configured.
    #[error("no store URL given and no default configured")]
    NoDefaultStore,

    /// The store could not be contacted at all.
    #[error("cannot reach {url}: {detail}")]
    Unreachable {
        /// Store URL.
        url: String,
        /// What went wrong.
        detail: String,
    },

    /// The store answered, but not in a way the protocol allows.
    #[error("{url}: unexpected response: {detail}")]
    UnexpectedResponse {
        /// Store URL.
        url: String,
        /// What was wrong with it.
        detail: String,
    },

    /// The remote reported an error for a request.
    #[error("{url}: remote error: {detail}")]
    Remote {
        /// Store URL.
        url: String,
        /// Message from the remote.
        detail: String,
    },

    /// Local storage error.
    #[error("storage error: {0}")]
    Storage(#[from] ballast_storage::StorageError),

    /// Wire protocol error.
    #[error("protocol error: {0}")]
    Proto(#[from] ballast_proto::ProtoError),

    /// Host repository error.
    #[error("host error: {0}")]
    Host(#[from] ballast_types::HostError),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns true for failures confined to a single file.
    pub fn is_transfer(&self) -> bool {
        matches!(self, Self::Transfer(_) | Self::ContentMismatch { .. })
    }

    /// Converts a per-request failure into a [`TransferError`] for `file`.
    ///
    /// Connection-level failures are left alone so batches still abort on them.
    pub(crate) fn for_file(self, file: &str, hash: &ContentHash, url: &str) -> Self {
        match self {
            Self::Unreachable { .. } | Self::Transfer(_) | Self::ContentMismatch { .. } => self,
            other => Self::Transfer(TransferError::new(file, *hash, url, other.to_string())),
        }
    }
}
