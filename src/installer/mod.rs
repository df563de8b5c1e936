//! Install, sync, update and remove operations on a Mosaic project.
//!
//! The [`Installer`] drives the resolver, the blob store and the project tree
//! and persists `mosaic.lock`, the `.poly` project file and `mosaic.toml`
//! together.
//!
//! # Operation Lifecycle
//!
//! Every mutating operation walks through the same states, each logged at
//! debug level:
//!
//! 1. **Resolving**: take the project lock, load the three artifacts, resolve
//!    the manifest (or reuse a fresh lockfile without any metadata queries)
//! 2. **Fetching**: fetch and verify the blob of every resolved package
//! 3. **Mutating**: reconcile the injected modules with the graph in memory
//! 4. **Committing**: stage changed artifacts, then rename them in the order
//!    lockfile, project file, manifest
//! 5. **Done**
//!
//! Nothing on disk is touched before `Committing`, so an error or a dropped
//! future in an earlier state leaves the project as it was. Artifacts whose
//! content did not change are not written at all.
//!
//! # Reconciliation
//!
//! Injected modules are matched to the graph by provenance tag. A module is
//! removed when its package left the graph, when its content hash no longer
//! matches the locked one, or when it duplicates a module already kept.
//! Packages without a matching module are injected. Foreign nodes are never
//! touched, so hand-written scripts survive every operation byte for byte.

pub mod commit;
pub mod project_lock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::BlobStore;
use crate::cache::archive::extract_module_source;
use crate::constants::{LOCKFILE_FILE, default_lock_timeout};
use crate::core::MosaicError;
use crate::lockfile::LockFile;
use crate::manifest::Manifest;
use crate::models::{PackageName, PackageSpec};
use crate::project::{ProjectTree, Provenance, find_project_file};
use crate::resolver::{DependencyGraph, Resolver};
use crate::source::PackageSource;

pub use commit::StagedCommit;
pub use project_lock::ProjectLock;

/// Maximum edit distance for a "did you mean" suggestion.
const SUGGESTION_DISTANCE: usize = 3;

/// Phase of a running operation. Only `Committing` writes to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Resolving,
    Fetching,
    Mutating,
    Committing,
    Done,
}

/// How much of the previous lockfile a run may rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    /// Reuse a fresh lockfile, and locked metadata when re-resolving
    Locked,
    /// Ask the registry about every package again
    Refresh,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resolving => "resolving",
            Self::Fetching => "fetching",
            Self::Mutating => "mutating",
            Self::Committing => "committing",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// What an operation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// `name@version` of modules injected into the project file
    pub injected: Vec<String>,
    /// `name@version` of modules removed from the project file
    pub removed: Vec<String>,
    /// Packages in the resolved graph
    pub resolved: usize,
    /// Blobs downloaded from the registry (cache misses and repairs)
    pub downloads: usize,
    /// Whether the lockfile was reused without querying the registry
    pub lockfile_reused: bool,
    /// Artifacts written, in commit order
    pub committed: Vec<&'static str>,
}

impl InstallReport {
    /// Whether the operation left every artifact as it was.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.committed.is_empty()
    }
}

/// One row of [`Installer::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: PackageName,
    pub version: semver::Version,
    pub checksum: String,
    /// Declared in `mosaic.toml` rather than pulled in transitively
    pub direct: bool,
    /// An injected module with the locked hash is present in the project file
    pub installed: bool,
}

/// The three artifacts of a project, loaded at the start of an operation.
struct Workspace {
    manifest: Manifest,
    lockfile: Option<LockFile>,
    project_path: PathBuf,
    tree: ProjectTree,
}

/// Runs operations against one project.
pub struct Installer {
    manifest_path: PathBuf,
    project_dir: PathBuf,
    project_file: Option<PathBuf>,
    source: Arc<dyn PackageSource>,
    store: BlobStore,
    lock_timeout: Duration,
    clock: fn() -> DateTime<Utc>,
}

impl fmt::Debug for Installer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Installer")
            .field("manifest_path", &self.manifest_path)
            .field("project_file", &self.project_file)
            .field("source", &self.source.id())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Installer {
    /// Create an installer for the project whose manifest is `manifest_path`.
    ///
    /// Blobs are cached under `cache_dir` and downloaded from `source`, at
    /// most `max_parallel` at a time.
    #[must_use]
    pub fn new(
        manifest_path: impl Into<PathBuf>,
        source: Arc<dyn PackageSource>,
        cache_dir: impl Into<PathBuf>,
        max_parallel: usize,
    ) -> Self {
        let manifest_path = manifest_path.into();
        let project_dir = manifest_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self {
            store: BlobStore::new(cache_dir, Arc::clone(&source), max_parallel),
            manifest_path,
            project_dir,
            project_file: None,
            source,
            lock_timeout: default_lock_timeout(),
            clock: Utc::now,
        }
    }

    /// Use `path` (relative to the project directory) as the project file
    /// instead of the first `*.poly` file.
    #[must_use]
    pub fn with_project_file(mut self, path: Option<PathBuf>) -> Self {
        self.project_file = path;
        self
    }

    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Clock used for the lockfile's `generated_at`.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    fn lockfile_path(&self) -> PathBuf {
        self.project_dir.join(LOCKFILE_FILE)
    }

    /// Declare `spec` in the manifest (or just sync when `None`) and bring
    /// the lockfile and project file in line.
    ///
    /// # Errors
    ///
    /// Resolution, integrity, network and parse errors abort before anything
    /// is written. [`MosaicError::CommitFailed`] reports a partial commit.
    pub async fn install(&self, spec: Option<&PackageSpec>) -> Result<InstallReport> {
        let _lock = self.lock().await?;
        let mut state = self.enter(None, OperationState::Resolving);
        let mut workspace = self.load_workspace()?;

        if let Some(spec) = spec {
            match workspace.manifest.add_dependency(spec.name.clone(), spec.constraint.clone()) {
                Some(previous) if previous != spec.constraint => {
                    info!(package = %spec.name, from = %previous, to = %spec.constraint, "Changing declared version");
                }
                Some(_) => debug!(package = %spec.name, "Already declared"),
                None => info!(package = %spec.name, version = %spec.constraint, "Declaring dependency"),
            }
        }

        self.run(workspace, &mut state, Resolution::Locked).await
    }

    /// Install exactly what the manifest declares.
    ///
    /// With a fresh lockfile and a warm cache this makes no network requests
    /// and writes nothing.
    ///
    /// # Errors
    ///
    /// See [`install`](Self::install).
    pub async fn sync(&self) -> Result<InstallReport> {
        self.install(None).await
    }

    /// Remove the declared dependency `name` and every package that only it
    /// required.
    ///
    /// # Errors
    ///
    /// [`MosaicError::DependencyNotDeclared`] if `name` is not declared; a
    /// package that is only a transitive dependency is reported with the
    /// packages that require it.
    pub async fn remove(&self, name: &str) -> Result<InstallReport> {
        let name = PackageName::new(name)?;
        let _lock = self.lock().await?;
        let mut state = self.enter(None, OperationState::Resolving);
        let mut workspace = self.load_workspace()?;

        if !workspace.manifest.declares(&name) {
            return Err(not_declared(&name, &workspace).into());
        }

        if let Some(lockfile) = &workspace.lockfile {
            let orphans = lockfile.to_graph(&workspace.manifest).orphaned_by(&name);
            let orphans: Vec<String> = orphans.iter().filter(|o| **o != name).map(ToString::to_string).collect();
            if !orphans.is_empty() {
                info!(package = %name, orphans = ?orphans, "Dropping dependencies only required by removed package");
            }
        }
        workspace.manifest.remove_dependency(&name);

        self.run(workspace, &mut state, Resolution::Locked).await
    }

    /// Resolve every declared package against the registry again, ignoring
    /// what the lockfile recorded, and reinstall whatever changed.
    ///
    /// Pins are exact, so versions stay as declared; a package whose content
    /// or dependencies were republished is picked up.
    ///
    /// # Errors
    ///
    /// See [`install`](Self::install).
    pub async fn update(&self) -> Result<InstallReport> {
        let _lock = self.lock().await?;
        let mut state = self.enter(None, OperationState::Resolving);
        let workspace = self.load_workspace()?;
        info!(packages = workspace.manifest.dependencies.len(), "Refreshing declared packages");
        self.run(workspace, &mut state, Resolution::Refresh).await
    }

    /// Locked packages and whether each one is injected into the project file.
    ///
    /// Read-only; takes no lock and makes no network requests.
    ///
    /// # Errors
    ///
    /// Fails if the manifest, lockfile or project file cannot be parsed.
    pub fn list(&self) -> Result<Vec<ListEntry>> {
        let manifest = Manifest::load(&self.manifest_path)?;
        let Some(lockfile) = LockFile::load(&self.lockfile_path())? else {
            return Ok(Vec::new());
        };

        let injected: BTreeSet<Provenance> =
            match find_project_file(&self.project_dir, self.project_file.as_deref()) {
                Ok(path) => ProjectTree::load(&path)?
                    .owned_nodes()
                    .into_iter()
                    .map(|owned| owned.provenance)
                    .collect(),
                Err(e) if is_missing_project_file(&e) => BTreeSet::new(),
                Err(e) => return Err(e),
            };

        Ok(lockfile
            .packages
            .iter()
            .map(|locked| ListEntry {
                name: locked.name.clone(),
                version: locked.version.clone(),
                checksum: locked.checksum.to_string(),
                direct: manifest.declares(&locked.name),
                installed: injected.contains(&Provenance {
                    package: locked.name.clone(),
                    content_hash: locked.checksum.clone(),
                }),
            })
            .collect())
    }

    /// The resolved graph recorded in the lockfile, if there is one.
    ///
    /// # Errors
    ///
    /// Fails if the manifest or lockfile cannot be parsed.
    pub fn locked_graph(&self) -> Result<Option<DependencyGraph>> {
        let manifest = Manifest::load(&self.manifest_path)?;
        Ok(LockFile::load(&self.lockfile_path())?.map(|lockfile| lockfile.to_graph(&manifest)))
    }

    async fn lock(&self) -> Result<ProjectLock> {
        ProjectLock::acquire_with_timeout(&self.project_dir, self.lock_timeout).await
    }

    fn enter(&self, from: Option<OperationState>, to: OperationState) -> OperationState {
        match from {
            Some(from) => debug!(project = %self.project_dir.display(), %from, %to, "State transition"),
            None => debug!(project = %self.project_dir.display(), state = %to, "Operation started"),
        }
        to
    }

    fn advance(&self, state: &mut OperationState, to: OperationState) {
        *state = self.enter(Some(*state), to);
    }

    /// Parse all three artifacts up front so malformed input aborts the
    /// operation before any work is done.
    ///
    /// Only a missing lockfile is regenerated. One that cannot be read is an
    /// error, so a lockfile from a newer Mosaic is never overwritten.
    fn load_workspace(&self) -> Result<Workspace> {
        let manifest = Manifest::load(&self.manifest_path)?;
        let lockfile = LockFile::load(&self.lockfile_path())?;
        let project_path = find_project_file(&self.project_dir, self.project_file.as_deref())?;
        let tree = ProjectTree::load(&project_path)?;
        debug!(project_file = %project_path.display(), "Loaded project file");
        Ok(Workspace {
            manifest,
            lockfile,
            project_path,
            tree,
        })
    }

    async fn run(
        &self,
        workspace: Workspace,
        state: &mut OperationState,
        resolution: Resolution,
    ) -> Result<InstallReport> {
        let Workspace {
            manifest,
            lockfile: previous,
            project_path,
            mut tree,
        } = workspace;
        let mut report = InstallReport::default();

        let reusable = previous.as_ref().filter(|_| resolution == Resolution::Locked);
        let (graph, lockfile) = match reusable {
            Some(previous) if previous.is_fresh_for(&manifest) => {
                debug!("Lockfile is fresh, skipping resolution");
                report.lockfile_reused = true;
                (previous.to_graph(&manifest), previous.clone())
            }
            _ => {
                let mut resolver = Resolver::new(self.source.as_ref());
                if let Some(previous) = reusable {
                    resolver = resolver.with_snapshot(previous);
                }
                let graph = resolver.resolve(&manifest.dependencies).await?;
                let lockfile = LockFile::from_graph(&graph, (self.clock)())
                    .with_stable_timestamp(previous.as_ref());
                (graph, lockfile)
            }
        };
        report.resolved = graph.len();

        self.advance(state, OperationState::Fetching);
        let downloads_before = self.store.downloads();
        let blobs = self.store.fetch_all(graph.packages()).await?;
        report.downloads = self.store.downloads() - downloads_before;

        self.advance(state, OperationState::Mutating);
        let mut kept: BTreeSet<PackageName> = BTreeSet::new();
        for owned in tree.owned_nodes() {
            let provenance = &owned.provenance;
            let current = graph
                .get(&provenance.package)
                .is_some_and(|package| package.content_hash == provenance.content_hash);
            if current && kept.insert(provenance.package.clone()) {
                continue;
            }
            tree.remove_node(owned.id);
            let label = match &owned.version {
                Some(version) => format!("{}@{version}", provenance.package),
                None => provenance.package.to_string(),
            };
            debug!(module = %label, hash = provenance.content_hash.short(), "Removed module");
            report.removed.push(label);
        }

        for package in graph.install_order()? {
            if kept.contains(&package.name) {
                continue;
            }
            let bytes = blobs.get(&package.name).with_context(|| {
                format!("Blob for {} missing after fetch", package.id())
            })?;
            let source = extract_module_source(&package.id(), bytes)?;
            let provenance = Provenance {
                package: package.name.clone(),
                content_hash: package.content_hash.clone(),
            };
            tree.insert_owned(&provenance, &package.version, package.name.leaf(), &source)?;
            debug!(module = %package.id(), hash = package.content_hash.short(), "Injected module");
            report.injected.push(package.id());
        }

        self.advance(state, OperationState::Committing);
        let mut commit = StagedCommit::new();
        commit.stage("lockfile", &self.lockfile_path(), &lockfile.render()?)?;
        commit.stage("project file", &project_path, &tree.serialize())?;
        commit.stage("manifest", &self.manifest_path, &manifest.render())?;
        report.committed = commit.commit().await?;

        self.advance(state, OperationState::Done);
        info!(
            resolved = report.resolved,
            injected = report.injected.len(),
            removed = report.removed.len(),
            downloads = report.downloads,
            committed = ?report.committed,
            "Operation complete"
        );
        Ok(report)
    }
}

/// Build the error for removing an undeclared package, naming the declared
/// packages that pull it in and the closest declared name.
fn not_declared(name: &PackageName, workspace: &Workspace) -> MosaicError {
    let required_by = workspace
        .lockfile
        .as_ref()
        .map(|lockfile| {
            let graph = lockfile.to_graph(&workspace.manifest);
            graph
                .dependents_of(name)
                .iter()
                .filter_map(|dependent| graph.get(dependent).map(|package| package.id()))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        })
        .unwrap_or_default();

    let did_you_mean = workspace
        .manifest
        .dependencies
        .keys()
        .map(|declared| (strsim::levenshtein(declared.as_str(), name.as_str()), declared))
        .filter(|(distance, _)| *distance <= SUGGESTION_DISTANCE)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, declared)| declared.to_string());

    MosaicError::DependencyNotDeclared {
        name: name.to_string(),
        required_by,
        did_you_mean,
    }
}

fn is_missing_project_file(error: &anyhow::Error) -> bool {
    matches!(error.downcast_ref::<MosaicError>(), Some(MosaicError::ProjectFileNotFound { .. }))
}
