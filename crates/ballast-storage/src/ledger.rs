//! The shadow ledger.
//!
//! The host ledger tracks standins; the shadow ledger tracks the big files
//! they stand for, so that status can tell a modified big file from a clean
//! one without hashing every file on every call. Each entry records the
//! tracking state plus the size and mtime observed when the file was last
//! known to match its standin.

use crate::{Result, StorageError};
use ballast_types::{HostState, Matcher, RepoLayout};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;

const LEDGER_VERSION: u32 = 1;

/// Tracking state of a big file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    /// Matched its standin when last checked.
    Normal,
    /// Scheduled for addition.
    Added,
    /// Scheduled for removal.
    Removed,
    /// Must be re-hashed before it can be called clean.
    Unsure,
}

impl EntryState {
    /// Translates a host ledger state for the corresponding standin.
    ///
    /// Merged standins become `Unsure`; untracked standins have no entry.
    pub fn from_host(state: HostState) -> Option<Self> {
        match state {
            HostState::Normal => Some(Self::Normal),
            HostState::Added => Some(Self::Added),
            HostState::Removed => Some(Self::Removed),
            HostState::Merged => Some(Self::Unsure),
            HostState::Untracked => None,
        }
    }
}

/// One shadow ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Tracking state.
    pub state: EntryState,
    /// Size in bytes when last checked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Modification time in nanoseconds since the epoch when last checked.
    /// `None` forces a hash comparison on the next status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime_ns: Option<u64>,
    /// Executable bit when last checked.
    #[serde(default)]
    pub executable: bool,
}

impl LedgerEntry {
    fn bare(state: EntryState) -> Self {
        Self {
            state,
            size: None,
            mtime_ns: None,
            executable: false,
        }
    }
}

/// Partition of ledger entries produced by [`ShadowLedger::status`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStatus {
    /// Present, but size and mtime cannot decide; the caller must hash.
    pub unsure: Vec<String>,
    /// Known to differ from the last recorded content.
    pub modified: Vec<String>,
    /// Scheduled for addition and present.
    pub added: Vec<String>,
    /// Scheduled for removal.
    pub removed: Vec<String>,
    /// Tracked but absent from the working copy.
    pub missing: Vec<String>,
    /// Unchanged since last checked.
    pub clean: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    entries: BTreeMap<String, LedgerEntry>,
}

/// The persisted shadow ledger of one working copy.
#[derive(Debug)]
pub struct ShadowLedger {
    path: PathBuf,
    root: PathBuf,
    entries: BTreeMap<String, LedgerEntry>,
}

impl ShadowLedger {
    /// Loads the ledger, or returns `None` if it has never been written.
    pub fn load(layout: &RepoLayout) -> Result<Option<Self>> {
        let path = layout.ledger_path();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file: LedgerFile = serde_json::from_slice(&data)?;
        if file.version != LEDGER_VERSION {
            return Err(StorageError::Ledger(format!(
                "unsupported ledger version {}",
                file.version
            )));
        }
        Ok(Some(Self {
            path,
            root: layout.root().to_path_buf(),
            entries: file.entries,
        }))
    }

    /// Creates an empty, unsaved ledger.
    pub fn empty(layout: &RepoLayout) -> Self {
        Self {
            path: layout.ledger_path(),
            root: layout.root().to_path_buf(),
            entries: BTreeMap::new(),
        }
    }

    /// Deletes the persisted ledger so the next load starts over.
    pub fn discard(layout: &RepoLayout) -> Result<()> {
        match fs::remove_file(layout.ledger_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the state of `file`, if tracked.
    pub fn state(&self, file: &str) -> Option<EntryState> {
        self.entries.get(file).map(|e| e.state)
    }

    /// Returns the entry for `file`, if tracked.
    pub fn entry(&self, file: &str) -> Option<&LedgerEntry> {
        self.entries.get(file)
    }

    /// Iterates over tracked paths in order.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of tracked paths.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Marks `file` as matching its standin, recording its current size and
    /// mtime. An mtime in the current second is not recorded, so a write
    /// landing in the same second is still caught.
    pub fn normal(&mut self, file: &str) -> Result<()> {
        let mut entry = LedgerEntry::bare(EntryState::Normal);
        match fs::metadata(self.wjoin(file)) {
            Ok(meta) => {
                entry.size = Some(meta.len());
                entry.mtime_ns = meta.modified().ok().and_then(stable_mtime);
                entry.executable = executable_bit(&meta);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.entries.insert(file.to_string(), entry);
        Ok(())
    }

    /// Marks `file` as scheduled for addition.
    pub fn add(&mut self, file: &str) {
        self.entries
            .insert(file.to_string(), LedgerEntry::bare(EntryState::Added));
    }

    /// Marks `file` as scheduled for removal.
    pub fn remove(&mut self, file: &str) {
        self.entries
            .insert(file.to_string(), LedgerEntry::bare(EntryState::Removed));
    }

    /// Marks `file` as needing a hash comparison.
    pub fn mark_unsure(&mut self, file: &str) {
        self.entries
            .insert(file.to_string(), LedgerEntry::bare(EntryState::Unsure));
    }

    /// Stops tracking `file`. Returns true if it was tracked.
    pub fn drop_entry(&mut self, file: &str) -> bool {
        self.entries.remove(file).is_some()
    }

    /// Classifies tracked files selected by `matcher` against the working copy.
    pub fn status(&self, matcher: &dyn Matcher) -> Result<LedgerStatus> {
        let mut status = LedgerStatus::default();
        for (file, entry) in &self.entries {
            if !matcher.matches(file) {
                continue;
            }
            if entry.state == EntryState::Removed {
                status.removed.push(file.clone());
                continue;
            }
            let meta = match fs::metadata(self.wjoin(file)) {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => {
                    status.missing.push(file.clone());
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    status.missing.push(file.clone());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let bucket = match entry.state {
                EntryState::Added => &mut status.added,
                EntryState::Unsure => &mut status.unsure,
                EntryState::Removed => unreachable!("handled above"),
                EntryState::Normal => {
                    if entry.size != Some(meta.len())
                        || entry.executable != executable_bit(&meta)
                    {
                        &mut status.modified
                    } else if entry.mtime_ns.is_none()
                        || entry.mtime_ns != meta.modified().ok().and_then(mtime_ns)
                    {
                        &mut status.unsure
                    } else {
                        &mut status.clean
                    }
                }
            };
            bucket.push(file.clone());
        }
        Ok(status)
    }

    /// Persists the ledger atomically.
    pub fn write(&self) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let file = LedgerFile {
            version: LEDGER_VERSION,
            entries: self.entries.clone(),
        };
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(&serde_json::to_vec_pretty(&file)?)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn wjoin(&self, file: &str) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(file.split('/').filter(|p| !p.is_empty()));
        path
    }
}

fn mtime_ns(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u64::try_from(d.as_nanos()).ok())
}

fn stable_mtime(time: SystemTime) -> Option<u64> {
    let recent = SystemTime::now()
        .checked_sub(Duration::from_secs(1))
        .map_or(true, |cutoff| time > cutoff);
    if recent {
        None
    } else {
        mtime_ns(time)
    }
}

#[cfg(unix)]
fn executable_bit(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o100 != 0
}

#[cfg(not(unix))]
fn executable_bit(_meta: &fs::Metadata) -> bool {
    false
}
