//! Repository lock.

use crate::{Result, StorageError};
use ballast_types::RepoLayout;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Exclusive lock over a repository's ledger-mutating operations.
///
/// The lock is an advisory `flock`-style lock on a file under the big-files
/// directory. The file records the owner's pid for diagnostics only; the
/// operating system drops the lock when the owning process exits, so a file
/// left behind by a crashed process does not block later callers.
/// Contention fails at once with [`StorageError::LockHeld`]; there is no
/// waiting.
#[derive(Debug)]
pub struct RepoLock {
    path: PathBuf,
    file: File,
}

impl RepoLock {
    /// Takes the lock.
    pub fn acquire(layout: &RepoLayout) -> Result<Self> {
        let path = layout.lock_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                return Err(StorageError::LockHeld {
                    holder: holder(&mut file),
                    path,
                });
            }
            Err(e) => return Err(e.into()),
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;
        debug!(path = %path.display(), "acquired repository lock");
        Ok(Self { path, file })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn holder(file: &mut File) -> String {
    let mut pid = String::new();
    match file.read_to_string(&mut pid) {
        Ok(_) if !pid.trim().is_empty() => format!("process {}", pid.trim()),
        _ => "another process".to_string(),
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release repository lock");
        }
    }
}
