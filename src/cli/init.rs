//! Create a `mosaic.toml` for a new project.
//!
//! The project is named after its directory:
//!
//! ```toml
//! [package]
//! name = "space-race"
//! version = "0.1.0"
//!
//! [dependencies]
//! ```

use anyhow::{Context, Result, anyhow};
use clap::Args;
use colored::Colorize;
use std::path::{Path, PathBuf};

use crate::constants::{MANIFEST_FILE, PROJECT_FILE_EXTENSION};
use crate::manifest::Manifest;

/// Create mosaic.toml in the project directory.
#[derive(Args, Debug)]
pub struct InitCommand {
    /// Project directory (default: current directory)
    #[arg(long)]
    path: Option<PathBuf>,

    /// Project name (default: directory name)
    #[arg(long)]
    name: Option<String>,

    /// Overwrite an existing mosaic.toml
    #[arg(short, long)]
    force: bool,
}

impl InitCommand {
    /// Write the manifest. `manifest_path` (from `--manifest-path`) wins over `--path`.
    ///
    /// # Errors
    ///
    /// Fails if the manifest exists and `--force` was not given, or it cannot
    /// be written.
    pub fn execute(self, manifest_path: Option<PathBuf>, quiet: bool) -> Result<()> {
        let manifest_path = match (manifest_path, &self.path) {
            (Some(path), _) => path,
            (None, Some(dir)) => dir.join(MANIFEST_FILE),
            (None, None) => std::env::current_dir()
                .context("Cannot determine current directory")?
                .join(MANIFEST_FILE),
        };
        let dir = manifest_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        if manifest_path.exists() && !self.force {
            return Err(anyhow!(
                "{} already exists; use --force to overwrite it",
                manifest_path.display()
            ));
        }

        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        let name = match self.name {
            Some(name) => name,
            None => project_name(&dir)?,
        };
        Manifest::new(&name)?.save(&manifest_path)?;

        if !quiet {
            println!("{} Created {} for '{}'", "✓".green(), manifest_path.display(), name.bold());
            if !has_project_file(&dir) {
                println!(
                    "{} No .{PROJECT_FILE_EXTENSION} project file in {} yet; modules are injected into one",
                    "!".yellow(),
                    dir.display()
                );
            }
            println!("\n{}", "Next steps:".cyan());
            println!("  {}", "mosaic install <name>@<version>".bright_white());
        }
        Ok(())
    }
}

fn project_name(dir: &Path) -> Result<String> {
    let absolute = std::fs::canonicalize(dir)
        .with_context(|| format!("Cannot resolve directory {}", dir.display()))?;
    Ok(absolute
        .file_name()
        .map_or_else(|| "project".to_string(), |name| name.to_string_lossy().into_owned()))
}

fn has_project_file(dir: &Path) -> bool {
    std::fs::read_dir(dir).is_ok_and(|entries| {
        entries.filter_map(Result::ok).any(|entry| {
            entry.path().extension().and_then(|ext| ext.to_str()) == Some(PROJECT_FILE_EXTENSION)
        })
    })
}
