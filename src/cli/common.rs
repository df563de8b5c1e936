//! Project and registry setup shared by the commands.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use super::CliConfig;
use crate::config::GlobalConfig;
use crate::installer::Installer;
use crate::source::{HttpRegistry, PackageSource, RetryingSource};
use crate::utils::find_manifest;

/// Everything a command needs to build an [`Installer`].
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// The project's `mosaic.toml`
    pub manifest_path: PathBuf,
    /// Effective global configuration, flags applied
    pub config: GlobalConfig,
}

impl CommandContext {
    /// Locate the manifest and load the global configuration.
    ///
    /// # Errors
    ///
    /// [`crate::core::MosaicError::ManifestNotFound`] when no manifest is
    /// found, or a config file error.
    pub async fn load(cli: &CliConfig) -> Result<Self> {
        let manifest_path = match &cli.manifest_path {
            Some(path) => path.clone(),
            None => {
                let cwd = std::env::current_dir().context("Cannot determine current directory")?;
                find_manifest(&cwd)?
            }
        };

        let mut config = GlobalConfig::load(cli.config_path.as_deref()).await?;
        if let Some(url) = &cli.registry_url {
            config.registry_url.clone_from(url);
        }
        debug!(
            manifest = %manifest_path.display(),
            registry = %config.registry_url,
            "Command context loaded"
        );

        Ok(Self {
            manifest_path,
            config,
        })
    }

    /// An installer talking to the configured registry.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built or the cache location is unknown.
    pub fn installer(&self, project_file: Option<PathBuf>) -> Result<Installer> {
        let policy = self.config.retry_policy();
        let registry =
            HttpRegistry::new(&self.config.registry_url, self.config.token.clone(), policy.timeout)?;
        let source: Arc<dyn PackageSource> = Arc::new(RetryingSource::new(registry, policy));
        Ok(Installer::new(
            self.manifest_path.clone(),
            source,
            self.config.cache_dir()?,
            self.config.max_parallel,
        )
        .with_project_file(project_file))
    }
}
