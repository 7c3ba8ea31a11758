#![allow(dead_code)]

use async_trait::async_trait;
use ballast_proto::{length_line, Capabilities, WireCommand, WireHandler};
use ballast_storage::standin::from_standin_path;
use ballast_storage::{CacheHierarchy, ContentHash};
use ballast_store::transport::{ByteStream, WireTransport};
use ballast_store::{BigFileStore, StoreError, StoreSource, WireStore};
use ballast_sync::BigFileTracker;
use ballast_types::testing::{MemoryDirstate, MemoryHistory};
use ballast_types::{History, RepoLayout, RevisionId};
use bytes::Bytes;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// Serves wire commands straight from a handler, counting requests.
pub struct Loopback {
    pub handler: WireHandler,
    pub requests: AtomicUsize,
}

#[async_trait]
impl WireTransport for Loopback {
    fn url(&self) -> &str {
        "loopback://server"
    }

    async fn capabilities(&self) -> ballast_store::Result<Capabilities> {
        Ok(self.handler.capabilities())
    }

    async fn call(
        &self,
        _command: WireCommand,
        hash: &ContentHash,
    ) -> ballast_store::Result<Bytes> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let status = self.handler.stat_file(hash).await?;
        Ok(Bytes::from(status.encode()))
    }

    async fn call_stream(
        &self,
        _command: WireCommand,
        hash: &ContentHash,
    ) -> ballast_store::Result<ByteStream> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let (len, mut file) = self
            .handler
            .open_file(hash)
            .await
            .map_err(|e| StoreError::Remote {
                url: self.url().to_string(),
                detail: e.to_string(),
            })?;
        let mut body = length_line(len).into_bytes();
        file.read_to_end(&mut body).await?;
        Ok(Box::pin(futures::stream::iter(vec![Ok(Bytes::from(body))])))
    }

    async fn call_push(
        &self,
        _command: WireCommand,
        hash: &ContentHash,
        source: &Path,
    ) -> ballast_store::Result<Bytes> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let mut file = tokio::fs::File::open(source).await?;
        let status = self.handler.put_file(hash, &mut file).await?;
        Ok(Bytes::from(status.encode()))
    }
}

/// A store server backed by its own cache directories.
pub struct Server {
    pub cache: CacheHierarchy,
    pub transport: Arc<Loopback>,
}

impl Server {
    pub fn new(dir: &Path) -> Self {
        let cache = CacheHierarchy::new(dir.join("repo"), dir.join("system"));
        let transport = Arc::new(Loopback {
            handler: WireHandler::new(cache.clone()),
            requests: AtomicUsize::new(0),
        });
        Self { cache, transport }
    }

    /// A client handle feeding downloads into `cache`.
    pub fn store_for(&self, cache: Arc<CacheHierarchy>) -> BigFileStore {
        BigFileStore::new(Arc::new(WireStore::new(self.transport.clone())), cache)
    }

    pub fn requests(&self) -> usize {
        self.transport.requests.load(Ordering::SeqCst)
    }
}

/// A store source that counts how often it is opened.
pub struct CountingSource {
    pub store: BigFileStore,
    pub opened: AtomicUsize,
}

#[async_trait]
impl StoreSource for CountingSource {
    async fn open_store(&self) -> ballast_store::Result<BigFileStore> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.clone())
    }
}

/// One working copy of a shared history.
pub struct WorkingCopy {
    pub history: Arc<MemoryHistory>,
    pub dirstate: Arc<MemoryDirstate>,
    pub tracker: BigFileTracker,
}

impl WorkingCopy {
    /// Creates a working copy at `root` whose system cache is `system`.
    pub fn new(root: &Path, system: &Path, history: Arc<MemoryHistory>) -> Self {
        fs::create_dir_all(root).unwrap();
        let layout = RepoLayout::new(root, root.join(".hg"));
        let cache = CacheHierarchy::new(layout.bigfiles_dir(), system);
        let dirstate = Arc::new(MemoryDirstate::new());
        let tracker =
            BigFileTracker::new(layout, history.clone(), dirstate.clone(), Arc::new(cache));
        Self {
            history,
            dirstate,
            tracker,
        }
    }

    pub fn write(&self, path: &str, data: &[u8]) {
        let full = self.tracker.layout().wjoin(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, data).unwrap();
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        fs::read(self.tracker.layout().wjoin(path)).ok()
    }

    /// Commits the working standins of `files` on top of the working parent.
    pub fn commit(&self, files: &[&str]) -> RevisionId {
        let parent = self.history.working_parent().unwrap();
        let parents: Vec<&RevisionId> = parent.iter().collect();
        let mut builder = self.history.build(&parents);
        for file in files {
            let standin = format!(".bfs/{}", file);
            builder = match self.read(&standin) {
                Some(data) => builder.write(&standin, &data),
                None => builder.remove(&standin),
            };
        }
        let rev = builder.commit();
        self.dirstate.checkout(&self.history, &rev).unwrap();
        rev
    }

    /// Does what the host does on update: writes the standins of `rev` into
    /// the working copy and resets the host ledger to it.
    pub fn checkout_standins(&self, rev: &RevisionId) {
        for (path, _) in self.history.manifest(rev).unwrap() {
            if from_standin_path(&path).is_some() {
                let data = self.history.file_data(rev, &path).unwrap().unwrap();
                self.write(&path, &data);
            }
        }
        self.history.set_working_parent(Some(rev));
        self.dirstate.checkout(&self.history, rev).unwrap();
    }
}

pub fn hash(data: &[u8]) -> ContentHash {
    ContentHash::compute(data)
}
