//! `mosaic remove <name>`
//!
//! Removes a declared dependency. Packages that only it required are dropped
//! from the lockfile and the project file; packages other declarations still
//! need stay.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use super::CommandContext;
use super::install::print_report;

/// Remove a declared dependency.
#[derive(Args, Debug)]
pub struct RemoveCommand {
    /// Name of the dependency in mosaic.toml
    name: String,

    /// Project file to update (default: first *.poly in the project directory)
    #[arg(long, value_name = "PATH")]
    project_file: Option<PathBuf>,
}

impl RemoveCommand {
    /// # Errors
    ///
    /// [`crate::core::MosaicError::DependencyNotDeclared`] for an undeclared
    /// name, otherwise as for install.
    pub async fn execute(self, context: &CommandContext, quiet: bool) -> Result<()> {
        let installer = context.installer(self.project_file)?;
        let report = installer.remove(&self.name).await?;
        if !quiet {
            print_report(&report);
        }
        Ok(())
    }
}
