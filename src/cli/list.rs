//! `mosaic list`
//!
//! Reads `mosaic.lock` and the project file and prints every locked package,
//! marking the declared ones and those missing from the project file.
//! Makes no registry requests.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use super::CommandContext;
use crate::installer::ListEntry;
use crate::models::ContentHash;

/// List locked packages.
#[derive(Args, Debug)]
pub struct ListCommand {
    /// Show the dependency tree below each declared package
    #[arg(long)]
    tree: bool,

    /// Only show declared dependencies
    #[arg(long, conflicts_with = "tree")]
    direct: bool,

    /// Project file to inspect (default: first *.poly in the project directory)
    #[arg(long, value_name = "PATH")]
    project_file: Option<PathBuf>,
}

impl ListCommand {
    /// # Errors
    ///
    /// Fails if the manifest, lockfile or project file cannot be parsed.
    pub fn execute(self, context: &CommandContext) -> Result<()> {
        let installer = context.installer(self.project_file)?;

        if self.tree {
            match installer.locked_graph()? {
                Some(graph) if !graph.is_empty() => print!("{}", graph.to_tree_string()),
                _ => println!("No packages locked. Run {} first.", "mosaic install".bright_white()),
            }
            return Ok(());
        }

        let entries: Vec<ListEntry> =
            installer.list()?.into_iter().filter(|entry| !self.direct || entry.direct).collect();
        if entries.is_empty() {
            println!("No packages locked. Run {} first.", "mosaic install".bright_white());
            return Ok(());
        }

        for entry in &entries {
            println!("{}", format_entry(entry));
        }
        let missing = entries.iter().filter(|entry| !entry.installed).count();
        if missing > 0 {
            println!(
                "\n{} {missing} package(s) missing from the project file; run {} to restore them",
                "!".yellow(),
                "mosaic install".bright_white()
            );
        }
        Ok(())
    }
}

fn format_entry(entry: &ListEntry) -> String {
    let marker = if entry.installed { "✓".green() } else { "✗".red() };
    let kind = if entry.direct { "" } else { " (transitive)" };
    let hash = ContentHash::parse(&entry.checksum)
        .map_or_else(|_| entry.checksum.clone(), |hash| hash.short().to_string());
    format!("{marker} {}@{} {}{}", entry.name.as_str().bold(), entry.version, hash.dimmed(), kind.dimmed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PackageName;

    #[test]
    fn test_format_entry() {
        colored::control::set_override(false);
        let hash = ContentHash::of(b"logger");
        let entry = ListEntry {
            name: PackageName::new("logger").unwrap(),
            version: semver::Version::new(1, 2, 0),
            checksum: hash.to_string(),
            direct: false,
            installed: true,
        };
        assert_eq!(format_entry(&entry), format!("✓ logger@1.2.0 {} (transitive)", hash.short()));
    }
}
