//! In-memory host doubles for tests.
//!
//! `MemoryHistory` models a revision graph with per-file content and node
//! identities; `MemoryDirstate` models the host ledger.

use crate::{
    FileNodeId, HostDirstate, HostError, HostState, History, Manifest, Result, RevisionId,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
struct FileEntry {
    node: FileNodeId,
    data: Vec<u8>,
    executable: bool,
}

#[derive(Debug, Clone)]
struct Revision {
    parents: Vec<RevisionId>,
    files: BTreeMap<String, FileEntry>,
    changed: Vec<String>,
}

#[derive(Debug, Default)]
struct Graph {
    order: Vec<RevisionId>,
    revs: HashMap<RevisionId, Revision>,
    working_parent: Option<RevisionId>,
}

/// An in-memory revision graph.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    graph: RwLock<Graph>,
}

/// Pending changes for a new revision.
pub struct CommitBuilder<'a> {
    history: &'a MemoryHistory,
    parents: Vec<RevisionId>,
    changes: Vec<(String, Option<(Vec<u8>, bool)>)>,
}

impl CommitBuilder<'_> {
    /// Writes `data` at `path`.
    pub fn write(mut self, path: &str, data: &[u8]) -> Self {
        self.changes
            .push((path.to_string(), Some((data.to_vec(), false))));
        self
    }

    /// Writes `data` at `path` with the executable flag set.
    pub fn write_executable(mut self, path: &str, data: &[u8]) -> Self {
        self.changes
            .push((path.to_string(), Some((data.to_vec(), true))));
        self
    }

    /// Removes `path`.
    pub fn remove(mut self, path: &str) -> Self {
        self.changes.push((path.to_string(), None));
        self
    }

    /// Records the revision and makes it the working parent.
    pub fn commit(self) -> RevisionId {
        self.history.record(self.parents, self.changes)
    }
}

impl MemoryHistory {
    /// Creates an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a revision on top of `parents`.
    pub fn build(&self, parents: &[&RevisionId]) -> CommitBuilder<'_> {
        CommitBuilder {
            history: self,
            parents: parents.iter().map(|p| (*p).clone()).collect(),
            changes: Vec::new(),
        }
    }

    /// Commits `files` on top of `parents`.
    pub fn commit(&self, parents: &[&RevisionId], files: &[(&str, &[u8])]) -> RevisionId {
        files
            .iter()
            .fold(self.build(parents), |b, (path, data)| b.write(path, data))
            .commit()
    }

    /// Commits a merge of `p1` and `p2`, starting from `p1`'s files.
    ///
    /// `None` removes a file.
    pub fn commit_merge(
        &self,
        p1: &RevisionId,
        p2: &RevisionId,
        changes: &[(&str, Option<&[u8]>)],
    ) -> RevisionId {
        changes
            .iter()
            .fold(self.build(&[p1, p2]), |b, (path, data)| match data {
                Some(data) => b.write(path, data),
                None => b.remove(path),
            })
            .commit()
    }

    /// Moves the working copy to `rev`.
    pub fn set_working_parent(&self, rev: Option<&RevisionId>) {
        self.graph.write().working_parent = rev.cloned();
    }

    fn record(
        &self,
        parents: Vec<RevisionId>,
        changes: Vec<(String, Option<(Vec<u8>, bool)>)>,
    ) -> RevisionId {
        let mut graph = self.graph.write();
        let id = RevisionId::new(format!("{:040x}", graph.order.len() + 1));

        let parent_files: Vec<BTreeMap<String, FileEntry>> = parents
            .iter()
            .map(|p| graph.revs.get(p).map(|r| r.files.clone()).unwrap_or_default())
            .collect();
        let mut files = parent_files.first().cloned().unwrap_or_default();
        let mut changed = Vec::new();

        for (path, change) in changes {
            match change {
                Some((data, executable)) => {
                    let reused = parent_files.iter().find_map(|pf| {
                        pf.get(&path)
                            .filter(|e| e.data == data && e.executable == executable)
                            .map(|e| e.node.clone())
                    });
                    let node =
                        reused.unwrap_or_else(|| FileNodeId::new(format!("{}:{}", id, path)));
                    let differs_from_p1 = parent_files
                        .first()
                        .and_then(|pf| pf.get(&path))
                        .map_or(true, |e| e.node != node);
                    if differs_from_p1 {
                        changed.push(path.clone());
                    }
                    files.insert(
                        path,
                        FileEntry {
                            node,
                            data,
                            executable,
                        },
                    );
                }
                None => {
                    if files.remove(&path).is_some() {
                        changed.push(path);
                    }
                }
            }
        }

        graph.order.push(id.clone());
        graph.revs.insert(
            id.clone(),
            Revision {
                parents,
                files,
                changed,
            },
        );
        graph.working_parent = Some(id.clone());
        id
    }

    fn with_rev<T>(&self, rev: &RevisionId, f: impl FnOnce(&Revision) -> T) -> Result<T> {
        let graph = self.graph.read();
        graph
            .revs
            .get(rev)
            .map(f)
            .ok_or_else(|| HostError::UnknownRevision(rev.to_string()))
    }
}

impl History for MemoryHistory {
    fn working_parent(&self) -> Result<Option<RevisionId>> {
        Ok(self.graph.read().working_parent.clone())
    }

    fn revisions(&self) -> Result<Vec<RevisionId>> {
        Ok(self.graph.read().order.clone())
    }

    fn parents(&self, rev: &RevisionId) -> Result<Vec<RevisionId>> {
        self.with_rev(rev, |r| r.parents.clone())
    }

    fn changed_files(&self, rev: &RevisionId) -> Result<Vec<String>> {
        self.with_rev(rev, |r| r.changed.clone())
    }

    fn manifest(&self, rev: &RevisionId) -> Result<Manifest> {
        self.with_rev(rev, |r| {
            r.files
                .iter()
                .map(|(path, entry)| (path.clone(), entry.node.clone()))
                .collect()
        })
    }

    fn file_data(&self, rev: &RevisionId, path: &str) -> Result<Option<Vec<u8>>> {
        self.with_rev(rev, |r| r.files.get(path).map(|e| e.data.clone()))
    }

    fn is_executable(&self, rev: &RevisionId, path: &str) -> Result<bool> {
        self.with_rev(rev, |r| r.files.get(path).is_some_and(|e| e.executable))
    }
}

/// An in-memory host ledger.
#[derive(Debug, Default)]
pub struct MemoryDirstate {
    states: RwLock<BTreeMap<String, HostState>>,
}

impl MemoryDirstate {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the state of `path`; `Untracked` forgets it.
    pub fn set(&self, path: &str, state: HostState) {
        let mut states = self.states.write();
        if state == HostState::Untracked {
            states.remove(path);
        } else {
            states.insert(path.to_string(), state);
        }
    }

    /// Marks every file of `rev` as normal, replacing the current contents.
    pub fn checkout(&self, history: &MemoryHistory, rev: &RevisionId) -> Result<()> {
        let manifest = history.manifest(rev)?;
        let mut states = self.states.write();
        states.clear();
        for path in manifest.into_keys() {
            states.insert(path, HostState::Normal);
        }
        Ok(())
    }
}

impl HostDirstate for MemoryDirstate {
    fn tracked(&self) -> Result<Vec<String>> {
        Ok(self.states.read().keys().cloned().collect())
    }

    fn state(&self, path: &str) -> Result<HostState> {
        Ok(self
            .states
            .read()
            .get(path)
            .copied()
            .unwrap_or(HostState::Untracked))
    }
}
