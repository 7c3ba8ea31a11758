//! The store backend contract.

use crate::{Result, TransferError};
use async_trait::async_trait;
use ballast_proto::StatStatus;
use ballast_storage::ContentHash;
use std::fmt;
use std::path::Path;
use tokio::io::AsyncWrite;

/// Which backend implementation serves a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// The system cache.
    Local,
    /// `<base>/bfile/<hash>` HTTP API.
    HttpApi,
    /// Wire protocol commands.
    Wire,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::HttpApi => write!(f, "http-api"),
            Self::Wire => write!(f, "wire"),
        }
    }
}

/// Result of [`StoreBackend::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The store already held valid content; nothing was sent.
    AlreadyPresent,
    /// The content was sent and the store confirmed it.
    Uploaded,
    /// The backend does not take uploads (local stores).
    Skipped,
}

/// Operations every store backend provides.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Backend implementation.
    fn kind(&self) -> BackendKind;

    /// Store URL, for diagnostics.
    fn url(&self) -> &str;

    /// Reports whether the store holds valid content for `hash`.
    async fn stat(&self, hash: &ContentHash) -> Result<StatStatus>;

    /// Returns true if the store holds valid content for `hash`.
    async fn exists(&self, hash: &ContentHash) -> Result<bool> {
        Ok(self.stat(hash).await? == StatStatus::Ok)
    }

    /// Sends the content at `source` under `hash`.
    async fn send(&self, file: &str, source: &Path, hash: &ContentHash) -> Result<()>;

    /// Uploads `source` unless the store already holds it.
    ///
    /// Idempotent: a second put of the same hash sends nothing. After
    /// sending, the store is asked again and must confirm the content.
    async fn put(&self, file: &str, source: &Path, hash: &ContentHash) -> Result<PutOutcome> {
        if self.exists(hash).await? {
            return Ok(PutOutcome::AlreadyPresent);
        }
        self.send(file, source, hash).await?;
        match self.stat(hash).await? {
            StatStatus::Ok => Ok(PutOutcome::Uploaded),
            other => Err(TransferError::new(
                file,
                *hash,
                self.url(),
                format!("store reports {:?} after upload", other),
            )
            .into()),
        }
    }

    /// Streams the content for `hash` into `writer`, returning the hash of
    /// what was written.
    async fn fetch(
        &self,
        file: &str,
        hash: &ContentHash,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<ContentHash>;

    /// Checks the stored content for `hash`.
    ///
    /// The default ignores `contents`: a remote `stat` already has the
    /// server re-hash what it stores, so the check never downloads. Backends
    /// that hold the bytes themselves override this and only re-hash when
    /// `contents` is set.
    async fn check(&self, hash: &ContentHash, _contents: bool) -> Result<StatStatus> {
        self.stat(hash).await
    }
}
