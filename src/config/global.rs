//! Global configuration for Mosaic.
//!
//! User-wide settings live in `~/.mosaic/config.toml`. The file is optional;
//! every field has a default. It is the place for the registry token, which
//! must never be committed with a project.
//!
//! # File Format
//!
//! ```toml
//! registry_url = "https://api.getmosaic.run"
//! token = "mos_xxxxxxxxxxxx"
//! cache_dir = "/var/cache/mosaic"
//! max_parallel = 16
//! request_timeout_secs = 30
//! max_retries = 3
//! ```
//!
//! # Precedence
//!
//! 1. Command-line flags (`--registry-url`, `--config`)
//! 2. Environment: `MOSAIC_REGISTRY_URL`, `MOSAIC_TOKEN`, `MOSAIC_CACHE_DIR`
//! 3. The config file (`MOSAIC_CONFIG` overrides its location)
//! 4. Built-in defaults

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::debug;

use crate::constants::{
    DEFAULT_MAX_RETRIES, DEFAULT_REGISTRY_URL, DEFAULT_REQUEST_TIMEOUT_SECS, PROJECT_STATE_DIR,
    default_max_parallel,
};
use crate::source::RetryPolicy;

/// Environment variable naming an alternative config file.
pub const ENV_CONFIG: &str = "MOSAIC_CONFIG";
/// Environment variable overriding `registry_url`.
pub const ENV_REGISTRY_URL: &str = "MOSAIC_REGISTRY_URL";
/// Environment variable overriding `token`.
pub const ENV_TOKEN: &str = "MOSAIC_TOKEN";
/// Environment variable overriding `cache_dir`.
pub const ENV_CACHE_DIR: &str = "MOSAIC_CACHE_DIR";

/// Contents of `~/.mosaic/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Base URL of the package registry
    pub registry_url: String,

    /// Bearer token sent with registry requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Blob cache location; `~/.mosaic/cache` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Concurrent blob downloads
    pub max_parallel: usize,

    /// Timeout of a single registry request
    pub request_timeout_secs: u64,

    /// Retries of a transient registry failure
    pub max_retries: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            token: None,
            cache_dir: None,
            max_parallel: default_max_parallel(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl GlobalConfig {
    /// Load the configuration from `path` (or the default location) and
    /// apply environment overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, |key| std::env::var(key).ok()).await
    }

    /// Like [`load`](Self::load), reading the environment through `env`.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub async fn load_with_env(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path(&env)?,
        };

        let mut config = if path.exists() {
            Self::load_from(&path).await?
        } else {
            debug!(path = %path.display(), "No global config, using defaults");
            Self::default()
        };
        config.apply_env(&env);
        Ok(config)
    }

    /// Parse a config file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not valid TOML of this shape.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read global config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse global config from {}", path.display()))
    }

    /// `$MOSAIC_CONFIG`, or `~/.mosaic/config.toml`.
    ///
    /// # Errors
    ///
    /// Fails if the home directory cannot be determined.
    pub fn default_path(env: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
        if let Some(path) = env(ENV_CONFIG).filter(|p| !p.is_empty()) {
            return Ok(PathBuf::from(path));
        }
        Ok(mosaic_home()?.join("config.toml"))
    }

    /// Apply `MOSAIC_REGISTRY_URL`, `MOSAIC_TOKEN` and `MOSAIC_CACHE_DIR`.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| env(key).filter(|value| !value.trim().is_empty());
        if let Some(url) = non_empty(ENV_REGISTRY_URL) {
            self.registry_url = url;
        }
        if let Some(token) = non_empty(ENV_TOKEN) {
            self.token = Some(token);
        }
        if let Some(dir) = non_empty(ENV_CACHE_DIR) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
    }

    /// The blob cache directory.
    ///
    /// # Errors
    ///
    /// Fails if no directory is configured and the home directory cannot be
    /// determined.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(mosaic_home()?.join("cache")),
        }
    }

    /// Timeout and retry settings for registry requests.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.request_timeout_secs),
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        }
    }
}

/// `~/.mosaic`
fn mosaic_home() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
        .join(PROJECT_STATE_DIR))
}
