//! The big-file tracker.

use crate::{Result, SyncError};
use ballast_storage::standin::{
    decode_standin, from_standin_path, is_executable, read_standin, to_standin_path,
    write_standin,
};
use ballast_storage::{
    hash_file, CacheHierarchy, ContentHash, EntryState, RepoLock, ShadowLedger, StorageError,
};
use ballast_types::{History, HostDirstate, HostState, Matcher, RepoLayout, RevisionId};
use std::fs;
use std::io;
use std::sync::Arc;
use tracing::{debug, info};

/// Status of the big files in a working copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BigFileStatus {
    /// Content differs from the working parent.
    pub modified: Vec<String>,
    /// Scheduled for addition.
    pub added: Vec<String>,
    /// Scheduled for removal.
    pub removed: Vec<String>,
    /// Tracked but absent from the working copy.
    pub missing: Vec<String>,
    /// Tracked here, but the host no longer tracks the standin.
    pub unknown: Vec<String>,
    /// Always empty; ignore rules are applied by the host's matcher.
    pub ignored: Vec<String>,
    /// Unchanged.
    pub clean: Vec<String>,
}

/// A working copy's big files: layout, host views, cache, and shadow ledger.
#[derive(Clone)]
pub struct BigFileTracker {
    layout: RepoLayout,
    history: Arc<dyn History>,
    dirstate: Arc<dyn HostDirstate>,
    cache: Arc<CacheHierarchy>,
}

impl std::fmt::Debug for BigFileTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigFileTracker")
            .field("layout", &self.layout)
            .field("cache", &self.cache)
            .finish()
    }
}

impl BigFileTracker {
    /// Creates a tracker for the working copy at `layout`.
    pub fn new(
        layout: RepoLayout,
        history: Arc<dyn History>,
        dirstate: Arc<dyn HostDirstate>,
        cache: Arc<CacheHierarchy>,
    ) -> Self {
        Self {
            layout,
            history,
            dirstate,
            cache,
        }
    }

    /// Working copy layout.
    pub fn layout(&self) -> &RepoLayout {
        &self.layout
    }

    /// Host history.
    pub fn history(&self) -> &dyn History {
        self.history.as_ref()
    }

    /// Host ledger.
    pub fn dirstate(&self) -> &dyn HostDirstate {
        self.dirstate.as_ref()
    }

    /// Cache hierarchy.
    pub fn cache(&self) -> &CacheHierarchy {
        &self.cache
    }

    /// Shared handle to the cache hierarchy.
    pub fn cache_handle(&self) -> Arc<CacheHierarchy> {
        self.cache.clone()
    }

    /// Takes the repository lock.
    pub fn lock(&self) -> Result<RepoLock> {
        Ok(RepoLock::acquire(&self.layout)?)
    }

    /// Loads the shadow ledger, building it from the host ledger first if it
    /// has never been written.
    ///
    /// When bootstrapping, a standin the host calls normal only becomes
    /// normal here if the working file hashes to it; otherwise the file is
    /// marked unsure so the next status looks at it.
    pub fn open_ledger(&self) -> Result<ShadowLedger> {
        self.load_or_build_ledger(true)
    }

    fn load_or_build_ledger(&self, persist: bool) -> Result<ShadowLedger> {
        if let Some(ledger) = ShadowLedger::load(&self.layout)? {
            return Ok(ledger);
        }

        let mut ledger = ShadowLedger::empty(&self.layout);
        for standin in self.dirstate.tracked()? {
            let Some(file) = from_standin_path(&standin) else {
                continue;
            };
            let Some(state) = EntryState::from_host(self.dirstate.state(&standin)?) else {
                continue;
            };
            match state {
                EntryState::Normal => {
                    let expected = self.working_standin(&file)?;
                    match (expected, self.hash_working(&file)?) {
                        (Some(expected), Some(actual)) if expected == actual => {
                            ledger.normal(&file)?
                        }
                        _ => ledger.mark_unsure(&file),
                    }
                }
                EntryState::Added => ledger.add(&file),
                EntryState::Removed => ledger.remove(&file),
                EntryState::Unsure => ledger.mark_unsure(&file),
            }
        }
        if persist {
            ledger.write()?;
        }
        info!(entries = ledger.len(), "built big-file ledger from host ledger");
        Ok(ledger)
    }

    /// Deletes the shadow ledger so the next operation rebuilds it.
    pub fn reset_ledger(&self) -> Result<()> {
        let _lock = self.lock()?;
        ShadowLedger::discard(&self.layout)?;
        Ok(())
    }

    /// Reports the status of the big files selected by `matcher`.
    ///
    /// Files the ledger cannot decide by size and mtime are hashed and
    /// compared with the working parent's standin; the ones that match are
    /// recorded as normal. The ledger is only written back if the lock is
    /// free, so status never fails on contention.
    pub fn status(&self, matcher: &dyn Matcher) -> Result<BigFileStatus> {
        let lock = match self.lock() {
            Ok(lock) => Some(lock),
            Err(SyncError::Storage(StorageError::LockHeld { holder, .. })) => {
                debug!(holder = %holder, "repository locked; status will not update the ledger");
                None
            }
            Err(e) => return Err(e),
        };

        let mut ledger = self.load_or_build_ledger(lock.is_some())?;
        let partition = ledger.status(matcher)?;
        let parent = self.history.working_parent()?;

        let mut status = BigFileStatus {
            modified: partition.modified,
            added: partition.added,
            removed: partition.removed,
            missing: partition.missing,
            clean: partition.clean,
            ..Default::default()
        };

        let mut refreshed = false;
        for file in partition.unsure {
            let expected = match &parent {
                Some(rev) => self.committed_standin(rev, &file)?,
                None => None,
            };
            let expected = match expected {
                Some(hash) => Some(hash),
                None => self.working_standin(&file)?,
            };
            if expected.is_some() && expected == self.hash_working(&file)? {
                ledger.normal(&file)?;
                refreshed = true;
                status.clean.push(file);
            } else {
                status.modified.push(file);
            }
        }

        let ledger_files: Vec<String> = ledger
            .files()
            .filter(|f| matcher.matches(f))
            .map(str::to_string)
            .collect();
        for file in ledger_files {
            if self.dirstate.state(&to_standin_path(&file))? == HostState::Untracked {
                for bucket in [
                    &mut status.modified,
                    &mut status.added,
                    &mut status.removed,
                    &mut status.missing,
                    &mut status.clean,
                ] {
                    bucket.retain(|f| f != &file);
                }
                status.unknown.push(file);
            }
        }

        for bucket in [&mut status.modified, &mut status.clean, &mut status.unknown] {
            bucket.sort();
        }

        if refreshed && lock.is_some() {
            ledger.write()?;
        }
        Ok(status)
    }

    /// Starts tracking `paths` as big files.
    ///
    /// Each file is hashed and its standin written with the file's
    /// executable bit. Returns the standin paths for the host to track.
    pub fn add_bigfiles(&self, paths: &[&str]) -> Result<Vec<String>> {
        let _lock = self.lock()?;
        let mut ledger = self.open_ledger()?;
        let mut standins = Vec::with_capacity(paths.len());

        for path in paths {
            if from_standin_path(path).is_some() {
                return Err(SyncError::InvalidPath {
                    path: path.to_string(),
                    reason: "is a standin".to_string(),
                });
            }
            let wfile = self.layout.wjoin(path);
            if !wfile.is_file() {
                return Err(SyncError::InvalidPath {
                    path: path.to_string(),
                    reason: "no such file".to_string(),
                });
            }
            let hash = hash_file(&wfile)?;
            let standin = to_standin_path(path);
            write_standin(&self.layout.wjoin(&standin), &hash, is_executable(&wfile)?)?;
            ledger.add(path);
            debug!(file = %path, hash = %hash, "added big file");
            standins.push(standin);
        }

        ledger.write()?;
        Ok(standins)
    }

    /// Schedules `paths` for removal.
    ///
    /// With `unlink`, the working files and their standins are deleted.
    /// Returns the standin paths for the host to forget.
    pub fn remove_bigfiles(&self, paths: &[&str], unlink: bool) -> Result<Vec<String>> {
        let _lock = self.lock()?;
        let mut ledger = self.open_ledger()?;
        let mut standins = Vec::with_capacity(paths.len());

        for path in paths {
            if ledger.state(path).is_none() {
                return Err(SyncError::InvalidPath {
                    path: path.to_string(),
                    reason: "not a tracked big file".to_string(),
                });
            }
            let standin = to_standin_path(path);
            if unlink {
                remove_if_exists(&self.layout.wjoin(path))?;
                remove_if_exists(&self.layout.wjoin(&standin))?;
            }
            ledger.remove(path);
            standins.push(standin);
        }

        ledger.write()?;
        Ok(standins)
    }

    /// Hash named by the standin for `file` at `rev`, if it has one.
    pub fn committed_standin(&self, rev: &RevisionId, file: &str) -> Result<Option<ContentHash>> {
        let standin = to_standin_path(file);
        match self.history.file_data(rev, &standin)? {
            Some(data) => Ok(Some(decode_standin(&standin, &data)?)),
            None => Ok(None),
        }
    }

    /// Hash named by the working-copy standin for `file`, if present.
    pub fn working_standin(&self, file: &str) -> Result<Option<ContentHash>> {
        match read_standin(&self.layout.wjoin(&to_standin_path(file))) {
            Ok(hash) => Ok(Some(hash)),
            Err(StorageError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Hash of the working file, or `None` if it is absent.
    pub fn hash_working(&self, file: &str) -> Result<Option<ContentHash>> {
        match hash_file(&self.layout.wjoin(file)) {
            Ok(hash) => Ok(Some(hash)),
            Err(StorageError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

pub(crate) fn remove_if_exists(path: &std::path::Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ballast_storage::standin::encode_standin;
    use ballast_types::testing::{MemoryDirstate, MemoryHistory};
    use ballast_types::{AlwaysMatcher, ExactMatcher};
    use tempfile::TempDir;

    pub(crate) struct Repo {
        pub dir: TempDir,
        pub history: Arc<MemoryHistory>,
        pub dirstate: Arc<MemoryDirstate>,
        pub tracker: BigFileTracker,
    }

    impl Repo {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().join("work");
            fs::create_dir_all(&root).unwrap();
            let layout = RepoLayout::new(&root, root.join(".hg"));
            let cache = CacheHierarchy::new(layout.bigfiles_dir(), dir.path().join("system"));
            let history = Arc::new(MemoryHistory::new());
            let dirstate = Arc::new(MemoryDirstate::new());
            let tracker = BigFileTracker::new(
                layout,
                history.clone(),
                dirstate.clone(),
                Arc::new(cache),
            );
            Self {
                dir,
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

        /// Commits the working standins of `files` and marks them clean in
        /// the host ledger.
        pub fn commit(&self, files: &[&str]) -> RevisionId {
            let parent = self.history.working_parent().unwrap();
            let parents: Vec<&RevisionId> = parent.iter().collect();
            let mut builder = self.history.build(&parents);
            for file in files {
                let standin = to_standin_path(file);
                builder = match self.read(&standin) {
                    Some(data) => builder.write(&standin, &data),
                    None => builder.remove(&standin),
                };
            }
            let rev = builder.commit();
            self.dirstate.checkout(&self.history, &rev).unwrap();
            rev
        }
    }

    #[test]
    fn test_bootstrap_from_host_ledger() {
        let repo = Repo::new();
        let hash = ContentHash::compute(b"clean");
        repo.write("clean.bin", b"clean");
        repo.write(".bfs/clean.bin", &encode_standin(&hash));
        repo.write("stale.bin", b"edited");
        repo.write(".bfs/stale.bin", &encode_standin(&ContentHash::compute(b"old")));
        repo.dirstate.set(".bfs/clean.bin", HostState::Normal);
        repo.dirstate.set(".bfs/stale.bin", HostState::Normal);
        repo.dirstate.set(".bfs/new.bin", HostState::Added);
        repo.dirstate.set(".bfs/gone.bin", HostState::Removed);
        repo.dirstate.set(".bfs/merged.bin", HostState::Merged);
        repo.dirstate.set("plain.txt", HostState::Normal);

        let ledger = repo.tracker.open_ledger().unwrap();
        assert_eq!(ledger.len(), 5);
        assert_eq!(ledger.state("clean.bin"), Some(EntryState::Normal));
        assert_eq!(ledger.state("stale.bin"), Some(EntryState::Unsure));
        assert_eq!(ledger.state("new.bin"), Some(EntryState::Added));
        assert_eq!(ledger.state("gone.bin"), Some(EntryState::Removed));
        assert_eq!(ledger.state("merged.bin"), Some(EntryState::Unsure));
        assert!(repo.tracker.layout().ledger_path().exists());
    }

    #[test]
    fn test_add_then_status() {
        let repo = Repo::new();
        repo.write("assets/video.mov", b"frames");

        let standins = repo.tracker.add_bigfiles(&["assets/video.mov"]).unwrap();
        assert_eq!(standins, vec![".bfs/assets/video.mov".to_string()]);
        assert_eq!(
            repo.tracker.working_standin("assets/video.mov").unwrap(),
            Some(ContentHash::compute(b"frames"))
        );
        repo.dirstate.set(&standins[0], HostState::Added);

        let status = repo.tracker.status(&AlwaysMatcher).unwrap();
        assert_eq!(status.added, vec!["assets/video.mov".to_string()]);
        assert!(status.modified.is_empty());
    }

    #[test]
    fn test_add_rejects_missing_and_standin_paths() {
        let repo = Repo::new();
        assert!(matches!(
            repo.tracker.add_bigfiles(&["nope.bin"]),
            Err(SyncError::InvalidPath { .. })
        ));
        repo.write(".bfs/x", b"");
        assert!(matches!(
            repo.tracker.add_bigfiles(&[".bfs/x"]),
            Err(SyncError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_status_rehashes_unsure_files() {
        let repo = Repo::new();
        repo.write("a.bin", b"one");
        repo.write("b.bin", b"two");
        let standins = repo.tracker.add_bigfiles(&["a.bin", "b.bin"]).unwrap();
        for standin in &standins {
            repo.dirstate.set(standin, HostState::Added);
        }
        repo.commit(&["a.bin", "b.bin"]);
        repo.tracker.reset_ledger().unwrap();

        // Rebuilt entries were just written, so their mtimes are too recent
        // to trust; the first status must hash.
        repo.write("b.bin", b"TWO");
        let status = repo.tracker.status(&AlwaysMatcher).unwrap();
        assert_eq!(status.clean, vec!["a.bin".to_string()]);
        assert_eq!(status.modified, vec!["b.bin".to_string()]);
    }

    #[test]
    fn test_status_reports_missing_removed_unknown() {
        let repo = Repo::new();
        repo.write("keep.bin", b"k");
        repo.write("lost.bin", b"l");
        repo.write("drop.bin", b"d");
        repo.write("orphan.bin", b"o");
        let standins = repo
            .tracker
            .add_bigfiles(&["keep.bin", "lost.bin", "drop.bin", "orphan.bin"])
            .unwrap();
        for standin in &standins[..3] {
            repo.dirstate.set(standin, HostState::Added);
        }
        fs::remove_file(repo.tracker.layout().wjoin("lost.bin")).unwrap();
        repo.tracker.remove_bigfiles(&["drop.bin"], true).unwrap();

        let status = repo.tracker.status(&AlwaysMatcher).unwrap();
        assert_eq!(status.added, vec!["keep.bin".to_string()]);
        assert_eq!(status.missing, vec!["lost.bin".to_string()]);
        assert_eq!(status.removed, vec!["drop.bin".to_string()]);
        assert_eq!(status.unknown, vec!["orphan.bin".to_string()]);
        assert!(status.ignored.is_empty());
        assert!(repo.read("drop.bin").is_none());
        assert!(repo.read(".bfs/drop.bin").is_none());
    }

    #[test]
    fn test_status_respects_matcher() {
        let repo = Repo::new();
        repo.write("a/x.bin", b"x");
        repo.write("b/y.bin", b"y");
        for standin in repo.tracker.add_bigfiles(&["a/x.bin", "b/y.bin"]).unwrap() {
            repo.dirstate.set(&standin, HostState::Added);
        }
        let status = repo.tracker.status(&ExactMatcher::new(["a"])).unwrap();
        assert_eq!(status.added, vec!["a/x.bin".to_string()]);
    }

    #[test]
    fn test_status_survives_held_lock() {
        let repo = Repo::new();
        repo.write("a.bin", b"a");
        for standin in repo.tracker.add_bigfiles(&["a.bin"]).unwrap() {
            repo.dirstate.set(&standin, HostState::Added);
        }
        let _held = repo.tracker.lock().unwrap();
        let status = repo.tracker.status(&AlwaysMatcher).unwrap();
        assert_eq!(status.added, vec!["a.bin".to_string()]);
        assert!(matches!(
            repo.tracker.add_bigfiles(&["a.bin"]),
            Err(SyncError::Storage(StorageError::LockHeld { .. }))
        ));
    }
}
