//! Uploading big files ahead of a host push.

use crate::Result;
use ballast_storage::standin::{decode_standin, from_standin_path};
use ballast_storage::{CacheHierarchy, ContentHash};
use ballast_store::{BackendKind, BigFileStore, PutOutcome, StoreError};
use ballast_types::{History, Progress, ProgressPhase, RevisionId};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// A big file revision that a push would publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFile {
    /// A path the content was committed under.
    pub file: String,
    /// Content hash.
    pub hash: ContentHash,
}

/// What [`upload_before_push`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Hashes sent to the store.
    pub uploaded: Vec<ContentHash>,
    /// Hashes the store already held.
    pub already_present: Vec<ContentHash>,
    /// Hashes not sent because the store shares this machine's cache.
    pub skipped: Vec<ContentHash>,
}

/// Lists the distinct big file contents committed in `outgoing`.
///
/// Merges contribute every standin that differs from either parent, so
/// content introduced while resolving a merge is not missed.
pub fn outgoing_hashes(
    history: &dyn History,
    outgoing: &[RevisionId],
) -> Result<Vec<OutgoingFile>> {
    let mut found: BTreeMap<ContentHash, String> = BTreeMap::new();
    for rev in outgoing {
        for path in history.touched_files(rev)? {
            let Some(file) = from_standin_path(&path) else {
                continue;
            };
            let Some(data) = history.file_data(rev, &path)? else {
                continue;
            };
            let hash = decode_standin(&path, &data)?;
            found.entry(hash).or_insert(file);
        }
    }
    Ok(found
        .into_iter()
        .map(|(hash, file)| OutgoingFile { file, hash })
        .collect())
}

/// Makes sure `store` holds every file in `files` before the host pushes.
///
/// Hashes the store already has are skipped. Content is read from the cache
/// tiers; a hash no local tier holds aborts with
/// [`StoreError::MissingContent`], since pushing would publish a standin
/// nobody can resolve. Local stores share the system cache and are skipped
/// entirely.
pub async fn upload_before_push(
    cache: &CacheHierarchy,
    store: &BigFileStore,
    files: &[OutgoingFile],
    progress: &Progress,
) -> Result<UploadSummary> {
    let mut summary = UploadSummary::default();
    if store.kind() == BackendKind::Local {
        debug!(url = %store.url(), "local store; nothing to upload");
        summary.skipped = files.iter().map(|f| f.hash).collect();
        return Ok(summary);
    }

    let total = files.len() as u64;
    progress.start(ProgressPhase::Uploading, total);
    for outgoing in files {
        if store.exists(&outgoing.hash).await? {
            summary.already_present.push(outgoing.hash);
        } else {
            let (source, _) = cache
                .find_content(&outgoing.hash)
                .ok_or(StoreError::MissingContent(outgoing.hash))?;
            match store.put(&outgoing.file, &source, &outgoing.hash).await? {
                PutOutcome::Uploaded => summary.uploaded.push(outgoing.hash),
                PutOutcome::AlreadyPresent => summary.already_present.push(outgoing.hash),
                PutOutcome::Skipped => summary.skipped.push(outgoing.hash),
            }
        }
        progress.advance(ProgressPhase::Uploading, &outgoing.file, total);
    }

    info!(
        url = %store.url(),
        uploaded = summary.uploaded.len(),
        present = summary.already_present.len(),
        "uploaded big files"
    );
    Ok(summary)
}
