//! Read access to the host's revision history.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identifier of a revision in the host history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RevisionId(String);

impl RevisionId {
    /// Creates a revision identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first twelve characters, the form used in diagnostics.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RevisionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identity of one revision of one file in the host history.
///
/// Two revisions that carry the same file content without change share the
/// same file node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileNodeId(String);

impl FileNodeId {
    /// Creates a file node identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Files present in a revision, keyed by repository-relative path.
pub type Manifest = BTreeMap<String, FileNodeId>;

/// Read-only view of the host's revision graph.
pub trait History: Send + Sync {
    /// Returns the working copy's first parent, or `None` for an empty repository.
    fn working_parent(&self) -> Result<Option<RevisionId>>;

    /// Returns every revision, parents before children.
    fn revisions(&self) -> Result<Vec<RevisionId>>;

    /// Returns the parents of a revision (zero, one, or two).
    fn parents(&self, rev: &RevisionId) -> Result<Vec<RevisionId>>;

    /// Returns the files a revision changed relative to its first parent.
    fn changed_files(&self, rev: &RevisionId) -> Result<Vec<String>>;

    /// Returns the manifest of a revision.
    fn manifest(&self, rev: &RevisionId) -> Result<Manifest>;

    /// Returns the content of `path` at `rev`, or `None` if it is absent.
    fn file_data(&self, rev: &RevisionId, path: &str) -> Result<Option<Vec<u8>>>;

    /// Returns whether `path` is recorded as executable at `rev`.
    fn is_executable(&self, _rev: &RevisionId, _path: &str) -> Result<bool> {
        Ok(false)
    }

    /// Returns every file a revision touched.
    ///
    /// For merges this adds the manifest difference against both parents:
    /// files dropped by the merge and files whose node differs from either
    /// parent.
    fn touched_files(&self, rev: &RevisionId) -> Result<BTreeSet<String>> {
        let mut files: BTreeSet<String> = self.changed_files(rev)?.into_iter().collect();
        let parents = self.parents(rev)?;
        if let [p1, p2] = parents.as_slice() {
            let merged = self.manifest(rev)?;
            let m1 = self.manifest(p1)?;
            let m2 = self.manifest(p2)?;

            for path in m1.keys().chain(m2.keys()) {
                if !merged.contains_key(path) {
                    files.insert(path.clone());
                }
            }
            for (path, node) in &merged {
                if m1.get(path) != Some(node) || m2.get(path) != Some(node) {
                    files.insert(path.clone());
                }
            }
        }
        Ok(files)
    }
}
