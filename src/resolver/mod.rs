//! Dependency resolution.
//!
//! The resolver turns the manifest's declared constraints into a flat
//! [`DependencyGraph`] with exactly one version per package.
//!
//! # Algorithm
//!
//! 1. Every declared dependency is pinned first, with `mosaic.toml` as the
//!    requester.
//! 2. Packages are visited depth-first with an explicit stack of frames. When
//!    a package's metadata arrives, each of its dependencies is pinned with
//!    `name@version` of the package as the requester. A second pin of the same
//!    name at a different version is a [`ResolutionError::VersionConflict`]
//!    naming both requesters.
//! 3. A dependency that is already on the stack closes a cycle, reported
//!    with the full path as [`ResolutionError::CycleDetected`].
//! 4. A package is recorded as resolved when all of its dependencies are.
//!
//! Dependencies are visited in name order, so the same inputs always produce
//! the same errors and the same graph.
//!
//! # Metadata Snapshot
//!
//! A resolver can be seeded with the current lockfile. Locked `name@version`
//! entries are then answered from the lockfile instead of the registry, which
//! keeps unchanged packages stable and avoids needless network requests.

pub mod dependency_graph;

pub use dependency_graph::{DependencyGraph, ResolvedPackage};

use semver::Version;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::core::{MosaicError, ResolutionError};
use crate::lockfile::LockFile;
use crate::models::PackageName;
use crate::source::{PackageMetadata, PackageSource, SourceError};
use crate::version::VersionConstraint;

/// Requester label for declarations in the manifest.
pub const MANIFEST_REQUESTER: &str = "mosaic.toml";

/// A package whose dependencies are being visited.
struct Frame {
    package: ResolvedPackage,
    pending: Vec<(PackageName, Version)>,
    next: usize,
}

impl Frame {
    fn next_dependency(&mut self) -> Option<(PackageName, Version)> {
        let dep = self.pending.get(self.next).cloned();
        self.next += 1;
        dep
    }
}

/// Resolves declared constraints against a [`PackageSource`].
pub struct Resolver<'a> {
    source: &'a dyn PackageSource,
    snapshot: HashMap<(PackageName, Version), (PackageMetadata, String)>,
}

impl<'a> Resolver<'a> {
    /// Create a resolver that queries `source` for every package.
    #[must_use]
    pub fn new(source: &'a dyn PackageSource) -> Self {
        Self {
            source,
            snapshot: HashMap::new(),
        }
    }

    /// Answer locked `name@version` queries from `lockfile`.
    #[must_use]
    pub fn with_snapshot(mut self, lockfile: &LockFile) -> Self {
        for locked in &lockfile.packages {
            let metadata = PackageMetadata {
                name: locked.name.clone(),
                version: locked.version.clone(),
                content_hash: locked.checksum.clone(),
                dependencies: locked
                    .dependencies
                    .iter()
                    .map(|spec| (spec.name.clone(), spec.constraint.clone()))
                    .collect(),
            };
            self.snapshot.insert(
                (locked.name.clone(), locked.version.clone()),
                (metadata, locked.source.clone()),
            );
        }
        self
    }

    /// Resolve `declared` into a dependency graph.
    ///
    /// # Errors
    ///
    /// - [`ResolutionError`] variants for missing packages, conflicting pins
    ///   and cycles
    /// - [`MosaicError::Auth`] / [`MosaicError::NetworkError`] when the
    ///   source fails or returns inconsistent metadata
    pub async fn resolve(
        &self,
        declared: &BTreeMap<PackageName, VersionConstraint>,
    ) -> Result<DependencyGraph, MosaicError> {
        let mut pins: HashMap<PackageName, (Version, String)> = HashMap::new();
        let mut graph = DependencyGraph::new();

        for (name, constraint) in declared {
            let version = constraint.select(&[]).clone();
            pins.insert(name.clone(), (version, MANIFEST_REQUESTER.to_string()));
            graph.add_root(name.clone());
        }

        for (root, constraint) in declared {
            if graph.contains(root) {
                continue;
            }
            let version = constraint.select(&[]).clone();
            let mut stack = vec![self.enter(root, &version, MANIFEST_REQUESTER, &mut pins).await?];

            while let Some(top) = stack.last_mut() {
                let Some((dep, dep_version)) = top.next_dependency() else {
                    if let Some(done) = stack.pop() {
                        debug!(package = %done.package.id(), "Resolved");
                        graph.insert(done.package);
                    }
                    continue;
                };
                let requester = top.package.id();

                if graph.contains(&dep) {
                    continue;
                }
                if let Some(start) = stack.iter().position(|frame| frame.package.name == dep) {
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|frame| frame.package.id()).collect();
                    cycle.push(format!("{dep}@{dep_version}"));
                    return Err(ResolutionError::CycleDetected {
                        cycle,
                    }
                    .into());
                }

                let frame = self.enter(&dep, &dep_version, &requester, &mut pins).await?;
                stack.push(frame);
            }
        }

        debug!(packages = graph.len(), "Resolution complete");
        Ok(graph)
    }

    /// Fetch metadata for `name@version`, pin its dependencies and build a frame.
    async fn enter(
        &self,
        name: &PackageName,
        version: &Version,
        requester: &str,
        pins: &mut HashMap<PackageName, (Version, String)>,
    ) -> Result<Frame, MosaicError> {
        let (metadata, source) = self.metadata(name, version, requester).await?;
        let id = format!("{name}@{version}");

        let mut pending = Vec::with_capacity(metadata.dependencies.len());
        let mut dependencies = BTreeMap::new();
        for (dep, constraint) in &metadata.dependencies {
            let dep_version = constraint.select(&[]).clone();
            match pins.get(dep) {
                Some((pinned, first_requester)) if pinned != &dep_version => {
                    return Err(ResolutionError::VersionConflict {
                        name: dep.to_string(),
                        first_version: pinned.to_string(),
                        first_requester: first_requester.clone(),
                        second_version: dep_version.to_string(),
                        second_requester: id,
                    }
                    .into());
                }
                Some(_) => {}
                None => {
                    pins.insert(dep.clone(), (dep_version.clone(), id.clone()));
                }
            }
            dependencies.insert(dep.clone(), dep_version.clone());
            pending.push((dep.clone(), dep_version));
        }

        Ok(Frame {
            package: ResolvedPackage {
                name: name.clone(),
                version: version.clone(),
                content_hash: metadata.content_hash,
                source,
                dependencies,
            },
            pending,
            next: 0,
        })
    }

    async fn metadata(
        &self,
        name: &PackageName,
        version: &Version,
        requester: &str,
    ) -> Result<(PackageMetadata, String), MosaicError> {
        if let Some(cached) = self.snapshot.get(&(name.clone(), version.clone())) {
            debug!(package = %name, %version, "Metadata from lockfile");
            return Ok(cached.clone());
        }

        debug!(package = %name, %version, "Querying metadata");
        let operation = format!("resolving {name}@{version}");
        let metadata = match self.source.metadata(name, version).await {
            Ok(metadata) => metadata,
            Err(SourceError::NotFound(_)) => {
                return Err(ResolutionError::NotFound {
                    name: name.to_string(),
                    version: version.to_string(),
                    requested_by: requester.to_string(),
                }
                .into());
            }
            Err(e) => return Err(e.into_error(&operation)),
        };

        if &metadata.name != name || &metadata.version != version {
            return Err(SourceError::InvalidResponse(format!(
                "asked for {name}@{version}, got {}@{}",
                metadata.name, metadata.version
            ))
            .into_error(&operation));
        }

        Ok((metadata, self.source.id().to_string()))
    }
}
