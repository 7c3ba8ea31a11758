//! Shared fixtures for node integration tests.

#![allow(dead_code)]

use ballast_node::api::{create_router, AppState};
use ballast_proto::WireHandler;
use ballast_storage::{CacheHierarchy, ContentHash};
use ballast_store::{BigFileStore, Direction, StoreConfig, StoreOpener};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// A node serving HTTP on an ephemeral port.
pub struct Node {
    pub dir: TempDir,
    pub url: String,
    pub state: AppState,
}

impl Node {
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheHierarchy::new(dir.path().join("served"), dir.path().join("system"));
        let state = AppState::new(WireHandler::new(cache));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            dir,
            url: format!("http://{}", addr),
            state,
        }
    }

    pub fn cache(&self) -> &CacheHierarchy {
        self.state.handler.cache()
    }

    /// Places content directly in the node's cache.
    pub fn seed(&self, data: &[u8]) -> ContentHash {
        let hash = ContentHash::compute(data);
        let source = self.dir.path().join(hash.to_hex());
        fs::write(&source, data).unwrap();
        self.cache().insert_file(&source, &hash).unwrap();
        hash
    }

    /// Stores the wrong bytes under the hash of `data`.
    pub fn corrupt(&self, data: &[u8]) -> ContentHash {
        let hash = ContentHash::compute(data);
        fs::create_dir_all(self.cache().repo_dir()).unwrap();
        fs::write(self.cache().cache_path(&hash), b"bit rot").unwrap();
        hash
    }
}

/// A client-side scratch area with its own cache hierarchy.
pub struct Client {
    pub dir: TempDir,
    pub cache: Arc<CacheHierarchy>,
}

impl Client {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(CacheHierarchy::new(
            dir.path().join("repo-cache"),
            dir.path().join("system-cache"),
        ));
        Self { dir, cache }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join("work").join(name)
    }

    /// Writes a working file and returns its path and hash.
    pub fn write(&self, name: &str, data: &[u8]) -> (PathBuf, ContentHash) {
        let path = self.path(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, data).unwrap();
        (path, ContentHash::compute(data))
    }

    pub fn opener(&self, url: &str) -> StoreOpener {
        let config = StoreConfig {
            default: Some(url.to_string()),
            ..StoreConfig::default()
        };
        StoreOpener::new(config, self.cache.clone()).unwrap()
    }

    pub async fn open(&self, url: &str) -> BigFileStore {
        self.opener(url).open(None, Direction::Pull).await.unwrap()
    }
}

pub fn read(path: &Path) -> Vec<u8> {
    fs::read(path).unwrap()
}
