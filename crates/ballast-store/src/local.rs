//! Local store backed by the system cache.
//!
//! Clones on one machine share the system cache, so a `file` remote needs no
//! transfers of its own: anything committed anywhere on the machine is
//! already in the system cache, and uploads are no-ops.

use crate::backend::{BackendKind, PutOutcome, StoreBackend};
use crate::{Result, TransferError};
use async_trait::async_trait;
use ballast_proto::StatStatus;
use ballast_storage::{copy_and_hash_async, hash_file, ContentHash};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWrite;

/// A store served from the system cache directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    url: String,
    system_dir: PathBuf,
}

impl LocalStore {
    /// Creates a local store for `url` over `system_dir`.
    pub fn new(url: impl Into<String>, system_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            system_dir: system_dir.into(),
        }
    }

    fn path(&self, hash: &ContentHash) -> PathBuf {
        self.system_dir.join(hash.to_hex())
    }

    async fn rehash(&self, hash: &ContentHash) -> Result<StatStatus> {
        let path = self.path(hash);
        if !path.is_file() {
            return Ok(StatStatus::Missing);
        }
        let actual = tokio::task::spawn_blocking(move || hash_file(&path))
            .await
            .map_err(std::io::Error::other)??;
        Ok(if actual == *hash {
            StatStatus::Ok
        } else {
            StatStatus::Mismatch
        })
    }
}

#[async_trait]
impl StoreBackend for LocalStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn url(&self) -> &str {
        &self.url
    }

    async fn stat(&self, hash: &ContentHash) -> Result<StatStatus> {
        self.rehash(hash).await
    }

    async fn send(&self, _file: &str, _source: &Path, _hash: &ContentHash) -> Result<()> {
        Ok(())
    }

    async fn put(&self, _file: &str, _source: &Path, _hash: &ContentHash) -> Result<PutOutcome> {
        Ok(PutOutcome::Skipped)
    }

    async fn fetch(
        &self,
        file: &str,
        hash: &ContentHash,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<ContentHash> {
        let mut source = match tokio::fs::File::open(self.path(hash)).await {
            Ok(source) => source,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(
                    TransferError::new(file, *hash, &self.url, "can't get file locally").into(),
                )
            }
            Err(e) => return Err(e.into()),
        };
        let (actual, _) = copy_and_hash_async(&mut source, writer).await?;
        Ok(actual)
    }

    async fn check(&self, hash: &ContentHash, contents: bool) -> Result<StatStatus> {
        if contents {
            self.rehash(hash).await
        } else if self.path(hash).is_file() {
            Ok(StatStatus::Ok)
        } else {
            Ok(StatStatus::Missing)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;
    use std::fs;

    fn store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new("file:///elsewhere", dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_fetch_from_system_cache() {
        let (dir, store) = store();
        let hash = ContentHash::compute(b"cached");
        fs::write(dir.path().join(hash.to_hex()), b"cached").unwrap();

        let mut out = Vec::new();
        let actual = store.fetch("f", &hash, &mut out).await.unwrap();
        assert_eq!(actual, hash);
        assert_eq!(out, b"cached");
    }

    #[tokio::test]
    async fn test_fetch_missing_is_transfer_error() {
        let (_dir, store) = store();
        let hash = ContentHash::compute(b"absent");
        let mut out = Vec::new();
        let err = store.fetch("f", &hash, &mut out).await.unwrap_err();
        assert!(matches!(err, StoreError::Transfer(_)));
    }

    #[tokio::test]
    async fn test_put_is_skipped() {
        let (dir, store) = store();
        let hash = ContentHash::compute(b"x");
        let outcome = store
            .put("f", &dir.path().join("nothing"), &hash)
            .await
            .unwrap();
        assert_eq!(outcome, PutOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_check_contents_detects_corruption() {
        let (dir, store) = store();
        let hash = ContentHash::compute(b"right");
        fs::write(dir.path().join(hash.to_hex()), b"wrong").unwrap();

        assert_eq!(store.check(&hash, false).await.unwrap(), StatStatus::Ok);
        assert_eq!(store.check(&hash, true).await.unwrap(), StatStatus::Mismatch);
        let absent = ContentHash::compute(b"absent");
        assert_eq!(store.check(&absent, true).await.unwrap(), StatStatus::Missing);
    }
}
