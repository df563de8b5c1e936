//! `mosaic install [name@version]`
//!
//! With a package, declares it in `mosaic.toml` (replacing an existing pin)
//! and installs. Without one, brings `mosaic.lock` and the project file in
//! line with the manifest; with a fresh lockfile and warm cache that makes no
//! registry requests and changes nothing.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use super::CommandContext;
use crate::installer::InstallReport;
use crate::models::PackageSpec;

/// Install a package or sync the project.
#[derive(Args, Debug)]
pub struct InstallCommand {
    /// Package to add, as name@version
    package: Option<String>,

    /// Project file to inject into (default: first *.poly in the project directory)
    #[arg(long, value_name = "PATH")]
    project_file: Option<PathBuf>,
}

impl InstallCommand {
    /// # Errors
    ///
    /// Returns resolution, integrity, network, parse and commit errors.
    pub async fn execute(self, context: &CommandContext, quiet: bool) -> Result<()> {
        let spec = self.package.as_deref().map(PackageSpec::parse).transpose()?;
        let installer = context.installer(self.project_file)?;
        let report = installer.install(spec.as_ref()).await?;
        if !quiet {
            print_report(&report);
        }
        Ok(())
    }
}

/// Status lines for an install or remove report.
pub(super) fn print_report(report: &InstallReport) {
    for removed in &report.removed {
        println!("  {} {}", "-".red(), removed);
    }
    for injected in &report.injected {
        println!("  {} {}", "+".green(), injected);
    }
    if report.is_noop() {
        println!("{} Up to date ({} packages)", "✓".green(), report.resolved);
        return;
    }
    println!(
        "{} {} packages locked, {} injected, {} removed, {} downloaded",
        "✓".green(),
        report.resolved,
        report.injected.len(),
        report.removed.len(),
        report.downloads
    );
}
