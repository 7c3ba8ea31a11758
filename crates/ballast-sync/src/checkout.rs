//! Bringing big files in line with a checked-out revision.

use crate::tracker::remove_if_exists;
use crate::{BigFileTracker, Result};
use ballast_storage::standin::{from_standin_path, is_executable, set_executable};
use ballast_storage::{CacheHierarchy, ContentHash, EntryState, StorageError};
use ballast_store::{FetchRequest, StoreSource};
use ballast_types::{Matcher, Progress, ProgressPhase, RevisionId};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// What [`reconcile_checkout`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Files written or whose mode changed.
    pub updated: Vec<String>,
    /// Files deleted because the revision no longer has them.
    pub removed: Vec<String>,
    /// Files that could be fetched from neither cache nor store.
    pub missing: Vec<String>,
}

struct Wanted {
    hash: ContentHash,
    executable: bool,
}

/// Makes the working copy's big files match the standins of `target`.
///
/// Big files with no standin in `target` are deleted, unless they are
/// scheduled for addition. Files that are absent or differ from their
/// standin are restored from the cache tiers when possible; the rest are
/// downloaded in one batch. The store is only opened if something has to be
/// downloaded.
pub async fn reconcile_checkout(
    tracker: &BigFileTracker,
    target: &RevisionId,
    matcher: &dyn Matcher,
    source: &dyn StoreSource,
    progress: &Progress,
) -> Result<UpdateSummary> {
    let _lock = tracker.lock()?;
    let mut ledger = tracker.open_ledger()?;
    let layout = tracker.layout();
    let cache = tracker.cache();
    let history = tracker.history();

    let mut wanted: BTreeMap<String, Wanted> = BTreeMap::new();
    for path in history.manifest(target)?.into_keys() {
        let Some(file) = from_standin_path(&path) else {
            continue;
        };
        if !matcher.matches(&file) {
            continue;
        }
        let Some(hash) = tracker.committed_standin(target, &file)? else {
            continue;
        };
        let executable = history.is_executable(target, &path)?;
        wanted.insert(file, Wanted { hash, executable });
    }

    let mut summary = UpdateSummary::default();
    let tracked: BTreeSet<String> = ledger
        .files()
        .filter(|f| matcher.matches(f))
        .map(str::to_string)
        .collect();
    for file in tracked.difference(&wanted.keys().cloned().collect()) {
        if ledger.state(file) == Some(EntryState::Added) {
            continue;
        }
        if remove_if_exists(&layout.wjoin(file))? {
            debug!(file = %file, "removed big file absent from target");
            summary.removed.push(file.clone());
        }
        ledger.drop_entry(file);
    }

    let total = wanted.len() as u64;
    progress.start(ProgressPhase::Updating, total);
    let mut queue = Vec::new();
    for (file, want) in &wanted {
        let dest = layout.wjoin(file);
        let current = tracker.hash_working(file)?;
        if current == Some(want.hash) {
            let mode_changed = is_executable(&dest)? != want.executable;
            if mode_changed {
                set_executable(&dest, want.executable)?;
                summary.updated.push(file.clone());
            }
            if mode_changed || ledger.state(file) != Some(EntryState::Normal) {
                ledger.normal(file)?;
            }
        } else if restore_from_cache(cache, &want.hash, &dest)? {
            set_executable(&dest, want.executable)?;
            ledger.normal(file)?;
            summary.updated.push(file.clone());
        } else {
            queue.push(FetchRequest {
                file: file.clone(),
                dest,
                hash: want.hash,
            });
        }
        progress.advance(ProgressPhase::Updating, file, total);
    }

    if !queue.is_empty() {
        debug!(count = queue.len(), "fetching big files missing from cache");
        let store = source.open_store().await?;
        let outcome = store.get(&queue, progress).await?;
        for file in &outcome.success {
            let executable = wanted.get(file).is_some_and(|w| w.executable);
            set_executable(&layout.wjoin(file), executable)?;
            ledger.normal(file)?;
            summary.updated.push(file.clone());
        }
        for file in outcome.missing {
            warn!(file = %file, "big file unavailable; left missing");
            ledger.mark_unsure(&file);
            summary.missing.push(file);
        }
    }

    ledger.write()?;
    summary.updated.sort();
    info!(
        updated = summary.updated.len(),
        removed = summary.removed.len(),
        missing = summary.missing.len(),
        "{} big files updated, {} removed",
        summary.updated.len(),
        summary.removed.len()
    );
    Ok(summary)
}

/// Copies `hash` from the cache tiers to `dest`.
///
/// A corrupt cache entry is evicted and counts as a miss, so the file falls
/// through to the store. Returns `false` on a miss.
fn restore_from_cache(cache: &CacheHierarchy, hash: &ContentHash, dest: &Path) -> Result<bool> {
    for _ in 0..2 {
        let restored = cache
            .promote(hash)
            .and_then(|_| cache.materialize(hash, dest));
        match restored {
            Ok(found) => return Ok(found),
            Err(StorageError::Corruption { path, actual, .. }) => {
                warn!(
                    hash = %hash,
                    actual = %actual,
                    path = %path.display(),
                    "cached big file is corrupt"
                );
                cache.evict_corrupt(hash)?;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(false)
}
