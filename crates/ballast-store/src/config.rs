//! Client configuration.
//!
//! Settings are layered: built-in defaults, then the user file
//! (`<config dir>/ballast/config.yaml`), then the repository file
//! (`<admin>/ballast.yaml`), then `BALLAST_*` environment variables with `__`
//! separating nested keys (`BALLAST_HTTP__TIMEOUT_SECS`).

use crate::Result;
use ::config::{Config, Environment, File};
use ballast_types::RepoLayout;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Client-side store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// System cache directory. Defaults to the platform location.
    pub system_cache: Option<PathBuf>,
    /// Store used for downloads and, absent `default_push`, uploads.
    pub default: Option<String>,
    /// Store used for uploads.
    pub default_push: Option<String>,
    /// ssh transport settings.
    pub ssh: SshConfig,
    /// HTTP client settings.
    pub http: HttpConfig,
}

/// ssh transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// ssh client program.
    pub command: String,
    /// Command run on the remote host; it must speak the stdio protocol.
    pub remote_command: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            command: "ssh".to_string(),
            remote_command: "ballast-node stdio".to_string(),
        }
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// User-Agent header.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            user_agent: format!("ballast/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            system_cache: None,
            default: None,
            default_push: None,
            ssh: SshConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Loads the layered configuration for a repository.
    pub fn load(layout: Option<&RepoLayout>) -> Result<Self> {
        let mut files = Vec::new();
        if let Some(dir) = dirs::config_dir() {
            files.push(dir.join("ballast").join("config.yaml"));
        }
        if let Some(layout) = layout {
            files.push(layout.config_path());
        }
        Self::load_layers(&files, true)
    }

    /// Loads configuration from `files` in order, later files overriding
    /// earlier ones. Missing files are skipped.
    pub fn load_layers(files: &[PathBuf], with_env: bool) -> Result<Self> {
        let mut builder = Config::builder();
        for file in files {
            builder = builder.add_source(File::from(file.as_path()).required(false));
        }
        if with_env {
            builder = builder.add_source(
                Environment::with_prefix("BALLAST")
                    .prefix_separator("_")
                    .separator("__"),
            );
        }
        Ok(builder.build()?.try_deserialize()?)
    }

    /// URL used for downloads.
    pub fn pull_url(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// URL used for uploads.
    pub fn push_url(&self) -> Option<&str> {
        self.default_push.as_deref().or(self.pull_url())
    }

    /// Builds the HTTP client used by HTTP backends and transports.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .user_agent(self.http.user_agent.clone())
            .timeout(Duration::from_secs(self.http.timeout_secs))
            .build()?)
    }
}
