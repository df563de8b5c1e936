//! Command-line interface for Mosaic.
//!
//! # Available Commands
//!
//! - `init` - create a `mosaic.toml` for the project in the current directory
//! - `install [name@version]` - declare a dependency and install, or sync
//!   the project with its manifest when no package is given
//! - `remove <name>` - drop a declared dependency and its orphans
//! - `update` - fetch every declared package's metadata again and reinstall
//!   what changed
//! - `list` - show locked packages and whether they are injected
//!
//! # Basic Workflow
//!
//! ```bash
//! mosaic init
//! mosaic install logger@1.2.0
//! mosaic list --tree
//! mosaic remove logger
//! ```
//!
//! # Global Options
//!
//! `--verbose` and `--quiet` control logging (`RUST_LOG` wins when set),
//! `--manifest-path` selects the project, `--registry-url` and `--config`
//! override the global configuration.

mod common;
mod init;
mod install;
mod list;
mod remove;
mod update;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use common::CommandContext;

/// Settings shared by every command, taken from the global flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliConfig {
    /// Filter directive for the tracing subscriber
    pub log_filter: String,
    /// Alternative global config file
    pub config_path: Option<PathBuf>,
    /// Explicit manifest location
    pub manifest_path: Option<PathBuf>,
    /// Registry URL overriding config and environment
    pub registry_url: Option<String>,
}

/// Mosaic - package manager for Polytoria projects
#[derive(Parser, Debug)]
#[command(
    name = "mosaic",
    about = "Mosaic - package manager for Polytoria projects",
    version,
    long_about = "Mosaic resolves Lua packages from the Mosaic registry, verifies them and injects them as ModuleScripts into your .poly project file."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Show debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the global config file (default: ~/.mosaic/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Path to mosaic.toml (default: searched upwards from the current directory)
    #[arg(long, global = true, value_name = "PATH")]
    manifest_path: Option<PathBuf>,

    /// Registry base URL
    #[arg(long, global = true, value_name = "URL")]
    registry_url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create mosaic.toml for a new project
    Init(init::InitCommand),

    /// Install a package, or sync the project with mosaic.toml
    Install(install::InstallCommand),

    /// Remove a declared dependency
    Remove(remove::RemoveCommand),

    /// List locked packages
    List(list::ListCommand),

    /// Re-resolve every declared package against the registry
    Update(update::UpdateCommand),
}

impl Cli {
    /// Global settings derived from the flags.
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_filter = if self.verbose {
            "mosaic=debug,mosaic_cli=debug"
        } else if self.quiet {
            "error"
        } else {
            "warn"
        };

        CliConfig {
            log_filter: log_filter.to_string(),
            config_path: self.config.clone(),
            manifest_path: self.manifest_path.clone(),
            registry_url: self.registry_url.clone(),
        }
    }

    /// Whether status output should be suppressed.
    #[must_use]
    pub const fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Run the selected command with explicit settings.
    ///
    /// # Errors
    ///
    /// Returns the command's error.
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        let quiet = self.quiet;
        match self.command {
            Commands::Init(cmd) => cmd.execute(config.manifest_path, quiet),
            Commands::Install(cmd) => cmd.execute(&CommandContext::load(&config).await?, quiet).await,
            Commands::Remove(cmd) => cmd.execute(&CommandContext::load(&config).await?, quiet).await,
            Commands::List(cmd) => cmd.execute(&CommandContext::load(&config).await?),
            Commands::Update(cmd) => cmd.execute(&CommandContext::load(&config).await?, quiet).await,
        }
    }
}
