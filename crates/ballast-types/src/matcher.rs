//! Path selection for operations that accept file patterns.

use std::collections::BTreeSet;

/// Decides whether a repository-relative path takes part in an operation.
///
/// Pattern syntax belongs to the host; ballast only asks yes-or-no.
pub trait Matcher: Send + Sync {
    /// Returns true if `path` is selected.
    fn matches(&self, path: &str) -> bool;
}

/// Selects every path.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysMatcher;

impl Matcher for AlwaysMatcher {
    fn matches(&self, _path: &str) -> bool {
        true
    }
}

/// Selects an explicit set of paths, or everything beneath a listed directory.
#[derive(Debug, Clone, Default)]
pub struct ExactMatcher {
    paths: BTreeSet<String>,
}

impl ExactMatcher {
    /// Creates a matcher for the given paths.
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths
                .into_iter()
                .map(|p| p.into().trim_end_matches('/').to_string())
                .collect(),
        }
    }
}

impl Matcher for ExactMatcher {
    fn matches(&self, path: &str) -> bool {
        if self.paths.contains(path) {
            return true;
        }
        self.paths.iter().any(|dir| {
            path.len() > dir.len()
                && path.starts_with(dir.as_str())
                && path.as_bytes()[dir.len()] == b'/'
        })
    }
}

impl<F> Matcher for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn matches(&self, path: &str) -> bool {
        self(path)
    }
}
