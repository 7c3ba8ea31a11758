//! The host's own file-tracking ledger.

use crate::Result;
use serde::{Deserialize, Serialize};

/// Tracking state of a path in the host ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    /// Tracked and unchanged since the last refresh.
    Normal,
    /// Scheduled for addition.
    Added,
    /// Scheduled for removal.
    Removed,
    /// Touched by an uncommitted merge.
    Merged,
    /// Not tracked.
    Untracked,
}

impl HostState {
    /// Returns the single-letter code the host uses for the state.
    pub fn code(&self) -> char {
        match self {
            Self::Normal => 'n',
            Self::Added => 'a',
            Self::Removed => 'r',
            Self::Merged => 'm',
            Self::Untracked => '?',
        }
    }
}

/// Host ledger queries needed to keep the shadow ledger in step.
pub trait HostDirstate: Send + Sync {
    /// Returns every path the host tracks, in any state but untracked.
    fn tracked(&self) -> Result<Vec<String>>;

    /// Returns the state of `path`.
    fn state(&self, path: &str) -> Result<HostState>;
}
