//! Progress reporting for long-running file transfers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback type for progress updates.
pub type ProgressCallback = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

/// Phase of a batched operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    /// Fetching content from a store.
    Downloading,
    /// Sending content to a store.
    Uploading,
    /// Checking store contents.
    Verifying,
    /// Refreshing working-copy files.
    Updating,
}

impl std::fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Downloading => write!(f, "getting big files"),
            Self::Uploading => write!(f, "uploading big files"),
            Self::Verifying => write!(f, "verifying"),
            Self::Updating => write!(f, "updating big files"),
        }
    }
}

/// Progress update information.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Current phase.
    pub phase: ProgressPhase,
    /// Item being processed, if any.
    pub current_item: Option<String>,
    /// Items completed so far.
    pub completed: u64,
    /// Total items in the phase.
    pub total: u64,
}

/// Progress tracker handed to batched operations.
#[derive(Clone, Default)]
pub struct Progress {
    completed: Arc<AtomicU64>,
    callback: Option<ProgressCallback>,
}

impl Progress {
    /// A tracker that reports nowhere.
    pub fn silent() -> Self {
        Self::default()
    }

    /// A tracker that forwards every update to `callback`.
    pub fn with_callback(callback: ProgressCallback) -> Self {
        Self {
            completed: Arc::new(AtomicU64::new(0)),
            callback: Some(callback),
        }
    }

    /// Starts a phase of `total` items.
    pub fn start(&self, phase: ProgressPhase, total: u64) {
        self.completed.store(0, Ordering::SeqCst);
        self.notify(phase, None, total);
    }

    /// Reports that `item` is done.
    pub fn advance(&self, phase: ProgressPhase, item: &str, total: u64) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.notify(phase, Some(item.to_string()), total);
    }

    /// Returns the number of items completed in the current phase.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    fn notify(&self, phase: ProgressPhase, current_item: Option<String>, total: u64) {
        if let Some(callback) = &self.callback {
            callback(&ProgressUpdate {
                phase,
                current_item,
                completed: self.completed(),
                total,
            });
        }
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("completed", &self.completed())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}
