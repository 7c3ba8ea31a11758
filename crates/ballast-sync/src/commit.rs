//! Keeping standins current around a host commit.

use crate::tracker::remove_if_exists;
use crate::{BigFileTracker, Result};
use ballast_storage::standin::{from_standin_path, is_executable, to_standin_path, write_standin};
use ballast_storage::EntryState;
use ballast_types::{Matcher, RevisionId};
use tracing::{debug, warn};

/// What [`refresh_standins`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitRefresh {
    /// Standins rewritten to match their big files.
    pub updated: Vec<String>,
    /// Standins of big files no longer tracked; the host should commit
    /// their removal.
    pub removed: Vec<String>,
}

/// Rewrites the standins of the big files selected by `matcher` so a
/// following host commit records their current content.
///
/// Every present big file is hashed; its standin is rewritten when the hash
/// or the executable bit differs. Files scheduled for removal, and files
/// whose standin has disappeared, stop being tracked.
pub fn refresh_standins(tracker: &BigFileTracker, matcher: &dyn Matcher) -> Result<CommitRefresh> {
    let _lock = tracker.lock()?;
    let mut ledger = tracker.open_ledger()?;
    let layout = tracker.layout();
    let mut refresh = CommitRefresh::default();

    let files: Vec<(String, EntryState)> = ledger
        .files()
        .filter(|f| matcher.matches(f))
        .filter_map(|f| ledger.state(f).map(|s| (f.to_string(), s)))
        .collect();

    for (file, state) in files {
        let standin = to_standin_path(&file);
        let standin_path = layout.wjoin(&standin);

        if state == EntryState::Removed {
            remove_if_exists(&standin_path)?;
            ledger.drop_entry(&file);
            refresh.removed.push(standin);
            continue;
        }
        if !standin_path.exists() {
            debug!(file = %file, "standin gone; no longer tracking");
            ledger.drop_entry(&file);
            refresh.removed.push(standin);
            continue;
        }

        let Some(actual) = tracker.hash_working(&file)? else {
            continue;
        };
        let wfile = layout.wjoin(&file);
        let executable = is_executable(&wfile)?;
        let recorded = tracker.working_standin(&file)?;
        if recorded != Some(actual) || is_executable(&standin_path)? != executable {
            write_standin(&standin_path, &actual, executable)?;
            debug!(file = %file, hash = %actual, "refreshed standin");
            refresh.updated.push(standin);
        }
    }

    ledger.write()?;
    Ok(refresh)
}

/// Records that `rev` was committed from the working copy.
///
/// The content of every big file `rev` changed goes into both cache tiers,
/// hash-verified, and the file is marked clean. Returns the files cached.
pub fn record_committed(tracker: &BigFileTracker, rev: &RevisionId) -> Result<Vec<String>> {
    let _lock = tracker.lock()?;
    let mut ledger = tracker.open_ledger()?;
    let mut cached = Vec::new();

    for path in tracker.history().touched_files(rev)? {
        let Some(file) = from_standin_path(&path) else {
            continue;
        };
        let Some(hash) = tracker.committed_standin(rev, &file)? else {
            ledger.drop_entry(&file);
            continue;
        };
        if tracker.hash_working(&file)? != Some(hash) {
            warn!(file = %file, hash = %hash, "big file changed since commit; not caching");
            ledger.mark_unsure(&file);
            continue;
        }
        tracker
            .cache()
            .insert_file(&tracker.layout().wjoin(&file), &hash)?;
        ledger.normal(&file)?;
        cached.push(file);
    }

    ledger.write()?;
    Ok(cached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::tests::Repo;
    use ballast_storage::ContentHash;
    use ballast_types::{AlwaysMatcher, HostState};

    fn tracked(repo: &Repo, files: &[(&str, &[u8])]) -> RevisionId {
        for (path, data) in files {
            repo.write(path, data);
        }
        let paths: Vec<&str> = files.iter().map(|(p, _)| *p).collect();
        for standin in repo.tracker.add_bigfiles(&paths).unwrap() {
            repo.dirstate.set(&standin, HostState::Added);
        }
        let rev = repo.commit(&paths);
        record_committed(&repo.tracker, &rev).unwrap();
        rev
    }

    #[test]
    fn test_refresh_rewrites_changed_standins() {
        let repo = Repo::new();
        tracked(&repo, &[("a.bin", b"one"), ("b.bin", b"two")]);
        repo.write("a.bin", b"ONE");

        let refresh = refresh_standins(&repo.tracker, &AlwaysMatcher).unwrap();
        assert_eq!(refresh.updated, vec![".bfs/a.bin".to_string()]);
        assert!(refresh.removed.is_empty());
        assert_eq!(
            repo.tracker.working_standin("a.bin").unwrap(),
            Some(ContentHash::compute(b"ONE"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_refresh_tracks_executable_bit() {
        let repo = Repo::new();
        tracked(&repo, &[("run", b"#!/bin/sh\n")]);
        ballast_storage::standin::set_executable(&repo.tracker.layout().wjoin("run"), true)
            .unwrap();

        let refresh = refresh_standins(&repo.tracker, &AlwaysMatcher).unwrap();
        assert_eq!(refresh.updated, vec![".bfs/run".to_string()]);
        assert!(is_executable(&repo.tracker.layout().wjoin(".bfs/run")).unwrap());
    }

    #[test]
    fn test_refresh_drops_removed_files() {
        let repo = Repo::new();
        tracked(&repo, &[("old.bin", b"old"), ("gone.bin", b"gone")]);
        repo.tracker.remove_bigfiles(&["old.bin"], false).unwrap();
        std::fs::remove_file(repo.tracker.layout().wjoin(".bfs/gone.bin")).unwrap();

        let refresh = refresh_standins(&repo.tracker, &AlwaysMatcher).unwrap();
        assert_eq!(
            refresh.removed,
            vec![".bfs/gone.bin".to_string(), ".bfs/old.bin".to_string()]
        );
        assert!(repo.read(".bfs/old.bin").is_none());
        assert!(repo.tracker.open_ledger().unwrap().is_empty());
    }

    #[test]
    fn test_record_committed_caches_and_cleans() {
        let repo = Repo::new();
        repo.write("asset.bin", b"payload");
        for standin in repo.tracker.add_bigfiles(&["asset.bin"]).unwrap() {
            repo.dirstate.set(&standin, HostState::Added);
        }
        let rev = repo.commit(&["asset.bin"]);

        let cached = record_committed(&repo.tracker, &rev).unwrap();
        assert_eq!(cached, vec!["asset.bin".to_string()]);
        let hash = ContentHash::compute(b"payload");
        assert!(repo.tracker.cache().in_cache(&hash));
        assert!(repo.tracker.cache().in_system_cache(&hash));
        assert_eq!(
            repo.tracker.open_ledger().unwrap().state("asset.bin"),
            Some(EntryState::Normal)
        );
    }

    #[test]
    fn test_record_committed_skips_edited_files() {
        let repo = Repo::new();
        repo.write("asset.bin", b"committed");
        for standin in repo.tracker.add_bigfiles(&["asset.bin"]).unwrap() {
            repo.dirstate.set(&standin, HostState::Added);
        }
        let rev = repo.commit(&["asset.bin"]);
        repo.write("asset.bin", b"edited after commit");

        let cached = record_committed(&repo.tracker, &rev).unwrap();
        assert!(cached.is_empty());
        assert!(!repo
            .tracker
            .cache()
            .in_cache(&ContentHash::compute(b"committed")));
        assert_eq!(
            repo.tracker.open_ledger().unwrap().state("asset.bin"),
            Some(EntryState::Unsure)
        );
    }
}
