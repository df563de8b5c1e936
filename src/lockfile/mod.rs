//! Lockfile management for reproducible installations.
//!
//! The lockfile (`mosaic.lock`) is derived from the manifest by resolution and
//! records the exact version, source and content hash of every package in the
//! dependency closure. Users never edit it; Mosaic rewrites it whenever the
//! manifest changes or the lockfile is missing or stale.
//!
//! # Lockfile Format
//!
//! ```toml
//! # Auto-generated lockfile - DO NOT EDIT
//! version = 1
//! generated_at = "2025-01-01T00:00:00Z"
//!
//! [[package]]
//! name = "logger"
//! version = "1.0.0"
//! checksum = "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
//! source = "https://api.getmosaic.run"
//! dependencies = ["strings@0.2.0"]
//! ```
//!
//! Entries are sorted by name and dependency lists are sorted, so the same
//! graph and timestamp always render the same bytes.
//!
//! # Timestamp Stability
//!
//! `generated_at` records when the package set last changed. Regenerating a
//! lockfile with the same packages keeps the previous timestamp (see
//! [`LockFile::with_stable_timestamp`]), so an unchanged install rewrites
//! nothing.

mod io;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::core::MosaicError;
use crate::manifest::Manifest;
use crate::models::{ContentHash, PackageName, PackageSpec};
use crate::resolver::{DependencyGraph, ResolvedPackage};
use crate::version::VersionConstraint;

/// The parsed contents of `mosaic.lock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFile {
    /// Lockfile format version
    pub version: u32,
    /// RFC 3339 time at which the package set was last changed
    pub generated_at: String,
    /// Locked packages, sorted by name
    #[serde(default, rename = "package")]
    pub packages: Vec<LockedPackage>,
}

/// A single `[[package]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPackage {
    /// Package name
    pub name: PackageName,
    /// Exact version
    pub version: Version,
    /// `sha256:<hex>` of the package blob
    pub checksum: ContentHash,
    /// Source the package was resolved from
    pub source: String,
    /// Direct dependencies as `name@version`, sorted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<PackageSpec>,
}

impl LockedPackage {
    /// `name@version`.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

impl LockFile {
    /// Current lockfile format version.
    pub const CURRENT_VERSION: u32 = 1;

    /// Build a lockfile from a resolved graph.
    #[must_use]
    pub fn from_graph(graph: &DependencyGraph, generated_at: DateTime<Utc>) -> Self {
        let packages = graph
            .packages()
            .map(|package| LockedPackage {
                name: package.name.clone(),
                version: package.version.clone(),
                checksum: package.content_hash.clone(),
                source: package.source.clone(),
                dependencies: package
                    .dependencies
                    .iter()
                    .map(|(name, version)| PackageSpec {
                        name: name.clone(),
                        constraint: VersionConstraint::exact(version.clone()),
                    })
                    .collect(),
            })
            .collect();

        Self {
            version: Self::CURRENT_VERSION,
            generated_at: generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            packages,
        }
    }

    /// Keep `previous.generated_at` when the locked packages did not change.
    #[must_use]
    pub fn with_stable_timestamp(mut self, previous: Option<&Self>) -> Self {
        if let Some(previous) = previous {
            if previous.packages == self.packages {
                self.generated_at.clone_from(&previous.generated_at);
            }
        }
        self
    }

    /// Look up a locked package.
    #[must_use]
    pub fn get(&self, name: &PackageName) -> Option<&LockedPackage> {
        self.packages.iter().find(|p| &p.name == name)
    }

    /// Rebuild the dependency graph, with the manifest's declarations as roots.
    #[must_use]
    pub fn to_graph(&self, manifest: &Manifest) -> DependencyGraph {
        let mut graph = self.package_graph();
        for name in manifest.dependencies.keys() {
            graph.add_root(name.clone());
        }
        graph
    }

    /// The locked packages and their edges, without roots.
    fn package_graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for package in &self.packages {
            graph.insert(ResolvedPackage {
                name: package.name.clone(),
                version: package.version.clone(),
                content_hash: package.checksum.clone(),
                source: package.source.clone(),
                dependencies: package
                    .dependencies
                    .iter()
                    .map(|spec| (spec.name.clone(), spec.constraint.pinned().clone()))
                    .collect(),
            });
        }
        graph
    }

    /// Whether this lockfile can be installed as is for `manifest`.
    ///
    /// Fresh means: every declared dependency is locked at its declared
    /// version, every dependency edge resolves within the lockfile, and every
    /// locked package is reachable from a declaration.
    #[must_use]
    pub fn is_fresh_for(&self, manifest: &Manifest) -> bool {
        if self.version != Self::CURRENT_VERSION || self.validate().is_err() {
            return false;
        }
        let declared_match = manifest.dependencies.iter().all(|(name, constraint)| {
            self.get(name).is_some_and(|locked| constraint.matches(&locked.version))
        });
        if !declared_match {
            return false;
        }
        let graph = self.to_graph(manifest);
        graph.reachable_from_roots().len() == self.packages.len()
    }

    /// Check the lockfile's internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::LockfileParseError`] for duplicate entries and
    /// dependency edges that do not resolve to a locked `name@version`.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| MosaicError::LockfileParseError {
            file: crate::constants::LOCKFILE_FILE.to_string(),
            reason,
        };

        let mut names: BTreeSet<&PackageName> = BTreeSet::new();
        for package in &self.packages {
            if !names.insert(&package.name) {
                return Err(invalid(format!("package '{}' is locked more than once", package.name))
                    .into());
            }
        }

        if let Some((from, to)) = self.package_graph().dangling_edges().into_iter().next() {
            return Err(invalid(format!("'{from}' depends on {to}, which is not locked")).into());
        }
        Ok(())
    }
}
