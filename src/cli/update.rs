//! `mosaic update`
//!
//! Reinstalls everything the manifest declares. Unlike `install`, the
//! lockfile is not trusted: every package's metadata is fetched from the
//! registry again, so republished content or dependencies are picked up.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use super::CommandContext;
use super::install::print_report;

/// Refresh every declared package from the registry.
#[derive(Args, Debug)]
pub struct UpdateCommand {
    /// Project file to update (default: first *.poly in the project directory)
    #[arg(long, value_name = "PATH")]
    project_file: Option<PathBuf>,
}

impl UpdateCommand {
    /// # Errors
    ///
    /// As for install.
    pub async fn execute(self, context: &CommandContext, quiet: bool) -> Result<()> {
        let installer = context.installer(self.project_file)?;
        let report = installer.update().await?;
        if !quiet {
            print_report(&report);
        }
        Ok(())
    }
}
