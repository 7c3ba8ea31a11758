//! Batched operations over a store backend.

use crate::backend::{BackendKind, PutOutcome, StoreBackend};
use crate::{Result, StoreError};
use ballast_proto::StatStatus;
use ballast_storage::standin::{decode_standin, from_standin_path};
use ballast_storage::{CacheHierarchy, ContentHash};
use ballast_types::{FileNodeId, History, Progress, ProgressPhase, RevisionId};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// One file to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Big file path, for diagnostics.
    pub file: String,
    /// Where the verified content goes.
    pub dest: PathBuf,
    /// Content to download.
    pub hash: ContentHash,
}

/// Result of [`BigFileStore::get`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOutcome {
    /// Files downloaded and verified.
    pub success: Vec<String>,
    /// Files that could not be downloaded.
    pub missing: Vec<String>,
}

/// Why a big file revision failed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The store does not hold the content.
    Missing,
    /// The store holds content that hashes to something else.
    ContentsDiffer,
    /// The committed standin could not be decoded.
    MalformedStandin(String),
    /// The store could not be asked about this file.
    Transfer(String),
}

/// A big file revision that failed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyFailure {
    /// First revision found carrying the file revision.
    pub revision: RevisionId,
    /// Big file path.
    pub file: String,
    /// Hash named by the standin, when it could be decoded.
    pub hash: Option<ContentHash>,
    /// What was wrong.
    pub kind: FailureKind,
}

impl fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rev = self.revision.short();
        match &self.kind {
            FailureKind::Missing => write!(f, "changeset {}: {} missing", rev, self.file),
            FailureKind::ContentsDiffer => {
                write!(f, "changeset {}: {}: contents differ", rev, self.file)
            }
            FailureKind::MalformedStandin(detail) | FailureKind::Transfer(detail) => {
                write!(f, "changeset {}: {}: {}", rev, self.file, detail)
            }
        }
    }
}

/// Result of [`BigFileStore::verify`].
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    /// Whether content was re-hashed rather than only checked for existence.
    pub contents: bool,
    /// Distinct big file revisions checked.
    pub revisions: usize,
    /// Distinct big files checked.
    pub files: usize,
    /// Everything that failed.
    pub failures: Vec<VerifyFailure>,
}

impl VerifyReport {
    /// Returns true if nothing failed.
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// The closing summary line.
    pub fn summary(&self) -> String {
        format!(
            "verified {} of {} revisions of {} big files",
            if self.contents { "contents" } else { "existence" },
            self.revisions,
            self.files
        )
    }
}

struct VerifyTask {
    revision: RevisionId,
    file: String,
    standin: Result<ContentHash>,
}

/// A store backend together with the local cache it feeds.
#[derive(Clone)]
pub struct BigFileStore {
    backend: Arc<dyn StoreBackend>,
    cache: Arc<CacheHierarchy>,
}

impl fmt::Debug for BigFileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigFileStore")
            .field("url", &self.backend.url())
            .field("kind", &self.backend.kind())
            .finish()
    }
}

impl BigFileStore {
    /// Wraps `backend`, caching downloads into `cache`.
    pub fn new(backend: Arc<dyn StoreBackend>, cache: Arc<CacheHierarchy>) -> Self {
        Self { backend, cache }
    }

    /// Store URL.
    pub fn url(&self) -> &str {
        self.backend.url()
    }

    /// Backend implementation.
    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// The underlying backend.
    pub fn backend(&self) -> &dyn StoreBackend {
        self.backend.as_ref()
    }

    /// Returns true if the store holds valid content for `hash`.
    pub async fn exists(&self, hash: &ContentHash) -> Result<bool> {
        self.backend.exists(hash).await
    }

    /// Uploads `source` as `hash` unless the store already holds it.
    pub async fn put(&self, file: &str, source: &Path, hash: &ContentHash) -> Result<PutOutcome> {
        self.backend.put(file, source, hash).await
    }

    /// Downloads a batch of files.
    ///
    /// Each file is streamed into a temporary file next to its destination,
    /// hashed on the way, and only renamed into place once it verifies.
    /// Failures confined to one file put it in `missing` and the batch goes
    /// on; an unreachable store aborts the batch.
    pub async fn get(&self, files: &[FetchRequest], progress: &Progress) -> Result<GetOutcome> {
        let total = files.len() as u64;
        progress.start(ProgressPhase::Downloading, total);

        let mut outcome = GetOutcome::default();
        for request in files {
            match self.fetch_one(request).await {
                Ok(()) => outcome.success.push(request.file.clone()),
                Err(StoreError::Transfer(e)) => {
                    warn!(file = %request.file, hash = %request.hash, "{}", e.long_message());
                    outcome.missing.push(request.file.clone());
                }
                Err(e) if e.is_transfer() => {
                    warn!(file = %request.file, hash = %request.hash, "{}", e);
                    outcome.missing.push(request.file.clone());
                }
                Err(e) => return Err(e),
            }
            progress.advance(ProgressPhase::Downloading, &request.file, total);
        }

        info!(
            url = %self.url(),
            downloaded = outcome.success.len(),
            missing = outcome.missing.len(),
            "fetched big files"
        );
        Ok(outcome)
    }

    async fn fetch_one(&self, request: &FetchRequest) -> Result<()> {
        let dir = request.dest.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(dir).await?;
        let temp = NamedTempFile::new_in(dir)?;
        let mut file = tokio::fs::File::from_std(temp.reopen()?);

        let actual = self
            .backend
            .fetch(&request.file, &request.hash, &mut file)
            .await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if actual != request.hash {
            return Err(StoreError::ContentMismatch {
                file: request.file.clone(),
                expected: request.hash,
                actual,
            });
        }
        temp.persist(&request.dest).map_err(|e| e.error)?;
        self.cache.store_verified(&request.dest, &request.hash)?;
        Ok(())
    }

    /// Checks that the store holds every big file committed in `revs`.
    ///
    /// Each distinct file revision is checked once. With `contents` the store
    /// re-hashes what it holds; otherwise only existence is required. Never
    /// fails on a bad file: every problem is logged and recorded in the
    /// report. Only an unreachable store aborts.
    pub async fn verify(
        &self,
        history: &dyn History,
        revs: &[RevisionId],
        contents: bool,
        progress: &Progress,
    ) -> Result<VerifyReport> {
        let tasks = collect_verify_tasks(history, revs)?;
        let total = tasks.len() as u64;
        progress.start(ProgressPhase::Verifying, total);

        let mut report = VerifyReport {
            contents,
            revisions: tasks.len(),
            files: tasks
                .iter()
                .map(|t| t.file.as_str())
                .collect::<BTreeSet<_>>()
                .len(),
            failures: Vec::new(),
        };

        for task in tasks {
            let failure = match &task.standin {
                Err(e) => Some((None, FailureKind::MalformedStandin(e.to_string()))),
                Ok(hash) => match self.backend.check(hash, contents).await {
                    Ok(StatStatus::Ok) => None,
                    Ok(StatStatus::Missing) => Some((Some(*hash), FailureKind::Missing)),
                    Ok(StatStatus::Mismatch) => Some((Some(*hash), FailureKind::ContentsDiffer)),
                    Err(e) => match e.for_file(&task.file, hash, self.url()) {
                        StoreError::Transfer(t) => {
                            Some((Some(*hash), FailureKind::Transfer(t.detail)))
                        }
                        e if e.is_transfer() => {
                            Some((Some(*hash), FailureKind::Transfer(e.to_string())))
                        }
                        e => return Err(e),
                    },
                },
            };
            if let Some((hash, kind)) = failure {
                let failure = VerifyFailure {
                    revision: task.revision,
                    file: task.file.clone(),
                    hash,
                    kind,
                };
                warn!("{}", failure);
                report.failures.push(failure);
            }
            progress.advance(ProgressPhase::Verifying, &task.file, total);
        }

        info!(url = %self.url(), failures = report.failures.len(), "{}", report.summary());
        Ok(report)
    }
}

/// Lists the distinct big file revisions in `revs`, keyed by path and file
/// node so a standin carried unchanged through many revisions counts once.
fn collect_verify_tasks(history: &dyn History, revs: &[RevisionId]) -> Result<Vec<VerifyTask>> {
    let mut seen: BTreeSet<(String, FileNodeId)> = BTreeSet::new();
    let mut tasks = Vec::new();
    for rev in revs {
        for (path, node) in history.manifest(rev)? {
            let Some(file) = from_standin_path(&path) else {
                continue;
            };
            if !seen.insert((file.clone(), node)) {
                continue;
            }
            let standin = match history.file_data(rev, &path)? {
                Some(data) => decode_standin(&path, &data).map_err(StoreError::from),
                None => Err(StoreError::Host(ballast_types::HostError::Backend(format!(
                    "{} listed in manifest of {} but has no data",
                    path, rev
                )))),
            };
            tasks.push(VerifyTask {
                revision: rev.clone(),
                file,
                standin,
            });
        }
    }
    Ok(tasks)
}
