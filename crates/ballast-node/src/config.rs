//! Node configuration.
//!
//! Settings come from built-in defaults, then an optional YAML file, then
//! `BALLAST_NODE_*` environment variables. Command-line flags are applied
//! last through [`ConfigOverrides`].

use ::config::{Config, Environment, File};
use ballast_storage::{default_system_cache_dir, CacheHierarchy};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default cap on a single upload body (8 GiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 8 * 1024 * 1024 * 1024;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for the Ballast node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// HTTP listen address.
    pub listen_addr: SocketAddr,
    /// Directory holding the content this node serves.
    pub cache_dir: PathBuf,
    /// Shared cache tier. Defaults to the platform cache location.
    pub system_cache: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log format (`pretty` or `json`).
    pub log_format: String,
    /// Largest accepted upload body in bytes.
    pub max_upload_bytes: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            cache_dir: PathBuf::from("./data"),
            system_cache: None,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl NodeConfig {
    /// Loads configuration from `path` (if given) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("BALLAST_NODE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values the type system cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_upload_bytes must be greater than zero".to_string(),
            ));
        }
        match self.log_format.to_lowercase().as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown log_format '{}' (expected pretty or json)",
                    other
                )))
            }
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("cache_dir is empty".to_string()));
        }
        Ok(())
    }

    /// Resolves the shared tier: the configured directory, the platform
    /// cache location, or `<cache_dir>/system` when the platform has none.
    pub fn system_cache_dir(&self) -> PathBuf {
        self.system_cache
            .clone()
            .or_else(default_system_cache_dir)
            .unwrap_or_else(|| self.cache_dir.join("system"))
    }

    /// Builds the cache hierarchy this node serves from.
    pub fn cache_hierarchy(&self) -> CacheHierarchy {
        CacheHierarchy::new(self.cache_dir.clone(), self.system_cache_dir())
    }

    /// Upload limit as a body size, saturating on narrow platforms.
    pub fn upload_limit(&self) -> usize {
        usize::try_from(self.max_upload_bytes).unwrap_or(usize::MAX)
    }
}

/// Values given on the command line, applied over loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// `--listen`
    pub listen_addr: Option<SocketAddr>,
    /// `--cache-dir`
    pub cache_dir: Option<PathBuf>,
    /// `--system-cache`
    pub system_cache: Option<PathBuf>,
    /// `--log-level`
    pub log_level: Option<String>,
    /// `--log-format`
    pub log_format: Option<String>,
    /// `--max-upload-bytes`
    pub max_upload_bytes: Option<u64>,
}

impl ConfigOverrides {
    /// Applies every value that was given and re-validates.
    pub fn apply(self, config: &mut NodeConfig) -> Result<(), ConfigError> {
        if let Some(addr) = self.listen_addr {
            config.listen_addr = addr;
        }
        if let Some(dir) = self.cache_dir {
            config.cache_dir = dir;
        }
        if let Some(dir) = self.system_cache {
            config.system_cache = Some(dir);
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        if let Some(max) = self.max_upload_bytes {
            config.max_upload_bytes = max;
        }
        config.validate()
    }
}
