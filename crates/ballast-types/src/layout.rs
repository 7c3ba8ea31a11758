//! On-disk layout of a host repository.

use std::path::{Path, PathBuf};

/// Directory name, under the host's administrative directory, that holds
/// the repository cache tier, the shadow ledger, and the lock file.
pub const BIGFILES_DIR: &str = "bigfiles";

/// Locations of a working copy and its administrative directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayout {
    root: PathBuf,
    admin: PathBuf,
}

impl RepoLayout {
    /// Creates a layout from the working-copy root and the host's
    /// administrative directory (for example `<root>/.hg`).
    pub fn new(root: impl Into<PathBuf>, admin: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            admin: admin.into(),
        }
    }

    /// Returns the working-copy root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the host's administrative directory.
    pub fn admin_dir(&self) -> &Path {
        &self.admin
    }

    /// Resolves a repository-relative, `/`-separated path against the root.
    pub fn wjoin(&self, path: &str) -> PathBuf {
        let mut out = self.root.clone();
        out.extend(path.split('/').filter(|part| !part.is_empty()));
        out
    }

    /// Directory holding ballast's per-repository state.
    pub fn bigfiles_dir(&self) -> PathBuf {
        self.admin.join(BIGFILES_DIR)
    }

    /// Path of the persisted shadow ledger.
    pub fn ledger_path(&self) -> PathBuf {
        self.bigfiles_dir().join("ledger.json")
    }

    /// Path of the repository lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.bigfiles_dir().join("wlock")
    }

    /// Path of the optional per-repository configuration file.
    pub fn config_path(&self) -> PathBuf {
        self.admin.join("ballast.yaml")
    }
}
