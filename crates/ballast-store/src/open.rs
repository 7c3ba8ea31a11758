//! Choosing a backend for a store URL.
//!
//! Each URL scheme maps to an ordered list of candidate backends. Every
//! candidate is probed in turn and the first one that reports itself capable
//! serves the store.

use crate::backend::StoreBackend;
use crate::transport::{HttpTransport, SshTransport, WireTransport};
use crate::{BigFileStore, HttpApiStore, LocalStore, Result, StoreConfig, StoreError, WireStore};
use async_trait::async_trait;
use ballast_storage::CacheHierarchy;
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, info};

/// Answer to a capability probe.
pub enum Probe {
    /// The backend can serve the URL.
    Capable(Box<dyn StoreBackend>),
    /// The backend cannot serve the URL.
    NotCapable {
        /// Why not, for diagnostics.
        reason: String,
    },
}

impl std::fmt::Debug for Probe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Capable(backend) => f
                .debug_tuple("Capable")
                .field(&backend.kind())
                .finish(),
            Self::NotCapable { reason } => f
                .debug_struct("NotCapable")
                .field("reason", reason)
                .finish(),
        }
    }
}

/// Splits `url` into its lower-cased scheme and the rest.
///
/// Bare paths, including Windows drive paths, have no scheme.
pub fn split_scheme(url: &str) -> (Option<String>, &str) {
    match url.split_once("://") {
        Some((scheme, rest))
            if !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-')) =>
        {
            (Some(scheme.to_ascii_lowercase()), rest)
        }
        _ => (None, url),
    }
}

/// Whether a store is opened for downloading or uploading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Downloads use `default`.
    Pull,
    /// Uploads use `default_push`, falling back to `default`.
    Push,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Candidate {
    Local,
    WireHttp,
    HttpApi,
    WireSsh,
}

fn candidates(url: &str) -> Result<&'static [Candidate]> {
    let (scheme, _) = split_scheme(url);
    match scheme.as_deref() {
        None | Some("file") => Ok(&[Candidate::Local]),
        Some("http") | Some("https") => Ok(&[Candidate::WireHttp, Candidate::HttpApi]),
        Some("ssh") => Ok(&[Candidate::WireSsh]),
        Some(other) => Err(StoreError::UnsupportedScheme(other.to_string())),
    }
}

/// Opens stores from configuration.
#[derive(Debug, Clone)]
pub struct StoreOpener {
    config: StoreConfig,
    cache: Arc<CacheHierarchy>,
    client: Client,
}

impl StoreOpener {
    /// Creates an opener for a repository's cache hierarchy.
    pub fn new(config: StoreConfig, cache: Arc<CacheHierarchy>) -> Result<Self> {
        let client = config.http_client()?;
        Ok(Self {
            config,
            cache,
            client,
        })
    }

    /// Returns the configuration in use.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Opens the store at `url`, or the configured default for `direction`.
    pub async fn open(&self, url: Option<&str>, direction: Direction) -> Result<BigFileStore> {
        let configured = match direction {
            Direction::Pull => self.config.pull_url(),
            Direction::Push => self.config.push_url(),
        };
        let url = url.or(configured).ok_or(StoreError::NoDefaultStore)?;

        for candidate in candidates(url)? {
            match self.probe(*candidate, url).await? {
                Probe::Capable(backend) => {
                    info!(url, backend = %backend.kind(), "opened big-file store");
                    return Ok(BigFileStore::new(Arc::from(backend), self.cache.clone()));
                }
                Probe::NotCapable { reason } => {
                    debug!(url, candidate = ?candidate, reason, "backend declined store URL");
                }
            }
        }
        Err(StoreError::NotAStore {
            url: url.to_string(),
        })
    }

    async fn probe(&self, candidate: Candidate, url: &str) -> Result<Probe> {
        match candidate {
            Candidate::Local => Ok(Probe::Capable(Box::new(LocalStore::new(
                url,
                self.cache.system_dir(),
            )))),
            Candidate::WireHttp => {
                let transport: Arc<dyn WireTransport> =
                    Arc::new(HttpTransport::new(url, self.client.clone()));
                WireStore::probe(transport).await
            }
            Candidate::HttpApi => HttpApiStore::probe(url, self.client.clone()).await,
            Candidate::WireSsh => {
                let transport: Arc<dyn WireTransport> =
                    Arc::new(SshTransport::new(url, &self.config.ssh)?);
                WireStore::probe(transport).await
            }
        }
    }
}

/// Something that can produce a store on demand.
///
/// Sync operations only open a store when they actually need to transfer
/// content, so a checkout served entirely from cache never touches the
/// network.
#[async_trait]
pub trait StoreSource: Send + Sync {
    /// Opens the store.
    async fn open_store(&self) -> Result<BigFileStore>;
}

#[async_trait]
impl StoreSource for StoreOpener {
    async fn open_store(&self) -> Result<BigFileStore> {
        self.open(None, Direction::Pull).await
    }
}

#[async_trait]
impl StoreSource for BigFileStore {
    async fn open_store(&self) -> Result<BigFileStore> {
        Ok(self.clone())
    }
}
