//! Server-side command handlers.
//!
//! Handlers are transport-neutral: the HTTP routes in `ballast-node` and the
//! pkt-line loop in [`crate::stdio`] both call into [`WireHandler`].

use crate::{Capabilities, ProtoError, PushStatus, Result, StatStatus};
use ballast_storage::{copy_and_hash_async, hash_file, CacheHierarchy, ContentHash};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

/// Serves big-file content out of a cache hierarchy.
#[derive(Debug, Clone)]
pub struct WireHandler {
    cache: Arc<CacheHierarchy>,
}

impl WireHandler {
    /// Creates a handler over `cache`.
    pub fn new(cache: CacheHierarchy) -> Self {
        Self {
            cache: Arc::new(cache),
        }
    }

    /// Returns the cache hierarchy being served.
    pub fn cache(&self) -> &CacheHierarchy {
        &self.cache
    }

    /// Returns the capabilities to advertise.
    pub fn capabilities(&self) -> Capabilities {
        Capabilities::server()
    }

    /// Receives content claimed to hash to `hash`.
    ///
    /// The body is streamed into a temporary file while it is hashed. On a
    /// mismatch the temporary file is discarded and `Failure` is returned;
    /// otherwise the content is published into both cache tiers.
    pub async fn put_file<R>(&self, hash: &ContentHash, body: &mut R) -> Result<PushStatus>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let temp = self.cache.temp_file()?;
        let mut file = tokio::fs::File::from_std(temp.reopen()?);
        let (actual, size) = copy_and_hash_async(body, &mut file).await?;
        file.sync_all().await?;
        drop(file);

        if actual != *hash {
            warn!(expected = %hash, actual = %actual, size, "rejecting upload with wrong hash");
            return Ok(PushStatus::Failure);
        }

        self.cache.adopt(temp, hash)?;
        info!(hash = %hash, size, "stored big file");
        Ok(PushStatus::Success)
    }

    /// Opens the content for `hash`, returning its length and a reader.
    pub async fn open_file(&self, hash: &ContentHash) -> Result<(u64, tokio::fs::File)> {
        let (path, tier) = self
            .cache
            .find_content(hash)
            .ok_or(ProtoError::NotFound(*hash))?;
        let file = tokio::fs::File::open(&path).await?;
        let len = file.metadata().await?.len();
        debug!(hash = %hash, tier = ?tier, len, "serving big file");
        Ok((len, file))
    }

    /// Re-hashes whatever content is stored under `hash`.
    ///
    /// Returns `None` when no tier holds it.
    pub async fn stored_hash(&self, hash: &ContentHash) -> Result<Option<ContentHash>> {
        let Some((path, _)) = self.cache.find_content(hash) else {
            return Ok(None);
        };
        let actual = tokio::task::spawn_blocking(move || hash_file(&path))
            .await
            .map_err(|e| ProtoError::Io(std::io::Error::other(e)))??;
        Ok(Some(actual))
    }

    /// Checks the stored content for `hash` without transmitting it.
    pub async fn stat_file(&self, hash: &ContentHash) -> Result<StatStatus> {
        match self.stored_hash(hash).await? {
            None => Ok(StatStatus::Missing),
            Some(actual) if actual == *hash => Ok(StatStatus::Ok),
            Some(actual) => {
                warn!(expected = %hash, actual = %actual, "stored content is corrupt");
                Ok(StatStatus::Mismatch)
            }
        }
    }
}
