//! Checking that the store holds committed big files.

use crate::Result;
use ballast_store::{BigFileStore, VerifyReport};
use ballast_types::{History, Progress};

/// Verifies the big files of every revision (`all`) or of the working
/// parent alone against `store`.
pub async fn verify_bigfiles(
    history: &dyn History,
    store: &BigFileStore,
    all: bool,
    contents: bool,
    progress: &Progress,
) -> Result<VerifyReport> {
    let revs = if all {
        history.revisions()?
    } else {
        history.working_parent()?.into_iter().collect()
    };
    Ok(store.verify(history, &revs, contents, progress).await?)
}
