//! Two-tier content-addressed cache.
//!
//! Content is cached per repository (`<admin>/bigfiles/<hash>`) and per user
//! (the system cache, shared by every clone on the machine). Entries are
//! keyed by the hash of their content and never modified in place, so tiers
//! can share storage through hard links. A slot is published by an atomic
//! no-clobber rename, so it is either complete or absent.

use crate::{copy_and_hash, hash_file, ContentHash, Result, StorageError};
use ballast_types::RepoLayout;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, trace, warn};

/// A cache tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// Per-repository cache under the administrative directory.
    Repo,
    /// Per-user cache shared by every repository.
    System,
}

/// Result of [`CacheHierarchy::promote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoteOutcome {
    /// Both tiers already held the content.
    Present,
    /// The content was copied or linked from the given tier into the other.
    Promoted {
        /// Tier the content was found in.
        from: CacheTier,
    },
    /// Neither tier holds the content.
    Absent,
}

/// Returns the default system cache location.
///
/// `$HOME/.bigfiles` on Unix-like systems, `<local app data>/bigfiles` on
/// Windows.
pub fn default_system_cache_dir() -> Option<PathBuf> {
    if cfg!(windows) {
        dirs::data_local_dir().map(|p| p.join("bigfiles"))
    } else {
        dirs::home_dir().map(|p| p.join(".bigfiles"))
    }
}

/// The repository and system cache tiers.
#[derive(Debug, Clone)]
pub struct CacheHierarchy {
    repo_dir: PathBuf,
    system_dir: PathBuf,
}

impl CacheHierarchy {
    /// Creates a hierarchy over explicit tier directories.
    pub fn new(repo_dir: impl Into<PathBuf>, system_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            system_dir: system_dir.into(),
        }
    }

    /// Creates the hierarchy for a repository, using the configured system
    /// cache or the platform default.
    pub fn for_repo(layout: &RepoLayout, system_cache: Option<&Path>) -> Result<Self> {
        let system_dir = match system_cache {
            Some(dir) => dir.to_path_buf(),
            None => default_system_cache_dir().ok_or(StorageError::NoSystemCache)?,
        };
        Ok(Self::new(layout.bigfiles_dir(), system_dir))
    }

    /// Directory of the repository tier.
    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    /// Directory of the system tier.
    pub fn system_dir(&self) -> &Path {
        &self.system_dir
    }

    /// Path of `hash` in the repository tier.
    pub fn cache_path(&self, hash: &ContentHash) -> PathBuf {
        self.repo_dir.join(hash.to_hex())
    }

    /// Path of `hash` in the system tier.
    pub fn system_cache_path(&self, hash: &ContentHash) -> PathBuf {
        self.system_dir.join(hash.to_hex())
    }

    /// Returns the path of `hash` in `tier`.
    pub fn tier_path(&self, tier: CacheTier, hash: &ContentHash) -> PathBuf {
        match tier {
            CacheTier::Repo => self.cache_path(hash),
            CacheTier::System => self.system_cache_path(hash),
        }
    }

    /// Returns true if the repository tier holds `hash`.
    pub fn in_cache(&self, hash: &ContentHash) -> bool {
        self.cache_path(hash).is_file()
    }

    /// Returns true if the system tier holds `hash`.
    pub fn in_system_cache(&self, hash: &ContentHash) -> bool {
        self.system_cache_path(hash).is_file()
    }

    /// Locates `hash`, preferring the repository tier.
    pub fn find_content(&self, hash: &ContentHash) -> Option<(PathBuf, CacheTier)> {
        [CacheTier::Repo, CacheTier::System]
            .into_iter()
            .map(|tier| (self.tier_path(tier, hash), tier))
            .find(|(path, _)| path.is_file())
    }

    /// Makes `hash` present in both tiers if it is present in either.
    ///
    /// The entry is re-hashed before it is shared with the other tier; a
    /// corrupt entry is left where it is and reported as
    /// [`StorageError::Corruption`]. Idempotent; concurrent promotions of the
    /// same hash are harmless.
    pub fn promote(&self, hash: &ContentHash) -> Result<PromoteOutcome> {
        let (in_repo, in_system) = (self.in_cache(hash), self.in_system_cache(hash));
        let from = match (in_repo, in_system) {
            (true, true) => return Ok(PromoteOutcome::Present),
            (false, false) => return Ok(PromoteOutcome::Absent),
            (true, false) => CacheTier::Repo,
            (false, true) => CacheTier::System,
        };
        let to = match from {
            CacheTier::Repo => CacheTier::System,
            CacheTier::System => CacheTier::Repo,
        };
        let source = self.tier_path(from, hash);
        check_slot(&source, hash)?;
        link_or_copy(&source, &self.tier_path(to, hash), hash)?;
        Ok(PromoteOutcome::Promoted { from })
    }

    /// Deletes every cached copy of `hash` whose content does not hash to it.
    ///
    /// Returns the tiers that were cleared.
    pub fn evict_corrupt(&self, hash: &ContentHash) -> Result<Vec<CacheTier>> {
        let mut evicted = Vec::new();
        for tier in [CacheTier::Repo, CacheTier::System] {
            let path = self.tier_path(tier, hash);
            if !path.is_file() {
                continue;
            }
            let actual = hash_file(&path)?;
            if actual != *hash {
                warn!(
                    hash = %hash,
                    actual = %actual,
                    tier = ?tier,
                    "evicting corrupt cache entry"
                );
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                evicted.push(tier);
            }
        }
        Ok(evicted)
    }

    /// Stores the content of `source` under `hash` in both tiers.
    ///
    /// The content is hashed while it is copied; on mismatch nothing is
    /// stored and [`StorageError::Corruption`] is returned. When the system
    /// tier already holds the content, it is linked into the repository tier
    /// and `source` is not read.
    pub fn insert_file(&self, source: &Path, hash: &ContentHash) -> Result<()> {
        if self.in_system_cache(hash) {
            return link_or_copy(&self.system_cache_path(hash), &self.cache_path(hash), hash);
        }
        if !self.in_cache(hash) {
            copy_verified(source, &self.cache_path(hash), hash)?;
        }
        link_or_copy(&self.cache_path(hash), &self.system_cache_path(hash), hash)
    }

    /// Stores a working file whose content was already verified as `hash`.
    ///
    /// The file is copied, never linked, into the repository tier so later
    /// edits to the working copy cannot reach the cache.
    pub fn store_verified(&self, path: &Path, hash: &ContentHash) -> Result<()> {
        if !self.in_cache(hash) {
            fs::create_dir_all(&self.repo_dir)?;
            let mut temp = NamedTempFile::new_in(&self.repo_dir)?;
            io::copy(&mut File::open(path)?, temp.as_file_mut())?;
            persist_noclobber(temp, &self.cache_path(hash))?;
        }
        link_or_copy(&self.cache_path(hash), &self.system_cache_path(hash), hash)
    }

    /// Creates a temporary file in the repository tier for streaming content in.
    pub fn temp_file(&self) -> Result<NamedTempFile> {
        fs::create_dir_all(&self.repo_dir)?;
        Ok(NamedTempFile::new_in(&self.repo_dir)?)
    }

    /// Publishes a temporary file from [`temp_file`](Self::temp_file) as
    /// `hash` in both tiers.
    ///
    /// The caller must have verified that the content hashes to `hash`.
    pub fn adopt(&self, temp: NamedTempFile, hash: &ContentHash) -> Result<()> {
        let dest = self.cache_path(hash);
        persist_noclobber(temp, &dest)?;
        link_or_copy(&dest, &self.system_cache_path(hash), hash)
    }

    /// Copies cached content for `hash` to `dest`, replacing whatever is there.
    ///
    /// Returns `false` if neither tier holds the content. The copy is hashed
    /// while it is written, and `dest` is only replaced once it verifies.
    pub fn materialize(&self, hash: &ContentHash, dest: &Path) -> Result<bool> {
        let Some((source, tier)) = self.find_content(hash) else {
            return Ok(false);
        };
        trace!(hash = %hash, tier = ?tier, dest = %dest.display(), "materializing from cache");
        let dir = dest.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut temp = NamedTempFile::new_in(dir)?;
        let (actual, _) = copy_and_hash(File::open(&source)?, temp.as_file_mut())?;
        if actual != *hash {
            return Err(StorageError::Corruption {
                path: source,
                expected: *hash,
                actual,
            });
        }
        temp.persist(dest).map_err(|e| e.error)?;
        Ok(true)
    }
}

fn check_slot(path: &Path, hash: &ContentHash) -> Result<()> {
    let actual = hash_file(path)?;
    if actual != *hash {
        return Err(StorageError::Corruption {
            path: path.to_path_buf(),
            expected: *hash,
            actual,
        });
    }
    Ok(())
}

/// Hard-links `source` to `dest`, falling back to a verified copy when the
/// filesystem refuses the link.
fn link_or_copy(source: &Path, dest: &Path, hash: &ContentHash) -> Result<()> {
    if dest.is_file() {
        return Ok(());
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::hard_link(source, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => {
            debug!(
                source = %source.display(),
                dest = %dest.display(),
                error = %e,
                "hard link failed, copying"
            );
            copy_verified(source, dest, hash)
        }
    }
}

/// Copies `source` to `dest` through a temporary file, hashing while copying
/// and carrying the source's permissions over.
fn copy_verified(source: &Path, dest: &Path, hash: &ContentHash) -> Result<()> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut temp = NamedTempFile::new_in(dir)?;
    let (actual, _) = copy_and_hash(File::open(source)?, temp.as_file_mut())?;
    if actual != *hash {
        return Err(StorageError::Corruption {
            path: source.to_path_buf(),
            expected: *hash,
            actual,
        });
    }
    fs::set_permissions(temp.path(), fs::metadata(source)?.permissions())?;
    persist_noclobber(temp, dest)
}

fn persist_noclobber(temp: NamedTempFile, dest: &Path) -> Result<()> {
    match temp.persist_noclobber(dest) {
        Ok(_) => Ok(()),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e.error.into()),
    }
}
