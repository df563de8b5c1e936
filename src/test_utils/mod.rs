//! Test utilities for Mosaic
//!
//! Helpers shared by unit tests and the integration suite (enable the
//! `test-utils` feature to use them from `tests/`):
//!
//! - [`init_test_logging`] - opt-in tracing output for tests
//! - [`MemoryRegistry`] - an in-memory [`PackageSource`] that counts requests
//!   and can serve corrupt bytes, transient failures or slow downloads
//! - [`build_archive`] - zip archives shaped like published packages
//! - [`ProjectFixture`] - a temporary project with a manifest and a `.poly` file
//!
//! # Example
//!
//! ```rust,no_run
//! use mosaic_cli::test_utils::{MemoryRegistry, ProjectFixture};
//!
//! let registry = MemoryRegistry::new();
//! registry.publish("logger", "1.0.0", &[]);
//! let project = ProjectFixture::new();
//! assert!(project.manifest_path().exists());
//! ```

use async_trait::async_trait;
use semver::Version;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use std::time::Duration;
use tempfile::TempDir;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::manifest::Manifest;
use crate::models::{ContentHash, PackageName};
use crate::source::{PackageMetadata, PackageSource, SourceError};
use crate::version::VersionConstraint;

static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests, once per process.
///
/// Uses `level` if given, otherwise `RUST_LOG`; with neither, tests stay quiet.
///
/// ```bash
/// RUST_LOG=mosaic_cli=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}

/// Build a zip archive holding `entries` as `(path, content)`.
///
/// Timestamps are fixed, so the same entries always produce the same bytes
/// and therefore the same content hash.
pub fn build_archive(entries: &[(&str, &str)]) -> Vec<u8> {
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .last_modified_time(zip::DateTime::default());
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (path, content) in entries {
        writer.start_file(*path, options).expect("start zip entry");
        writer.write_all(content.as_bytes()).expect("write zip entry");
    }
    writer.finish().expect("finish zip archive").into_inner()
}

/// Module source that [`MemoryRegistry::publish`] puts into `init.lua`.
pub fn module_source(name: &str, version: &str) -> String {
    format!("-- {name}@{version}\nreturn {{ name = \"{name}\", version = \"{version}\" }}\n")
}

type Key = (PackageName, Version);

#[derive(Default)]
struct RegistryState {
    packages: HashMap<Key, PackageMetadata>,
    blobs: HashMap<ContentHash, Vec<u8>>,
    aliases: HashMap<Key, Key>,
    corrupt: HashSet<ContentHash>,
    pending_failures: usize,
    blob_delay: Option<Duration>,
}

/// In-memory package registry.
///
/// Every request is counted, so tests can assert that an operation made no
/// network calls.
#[derive(Default)]
pub struct MemoryRegistry {
    state: Mutex<RegistryState>,
    metadata_requests: AtomicUsize,
    blob_requests: AtomicUsize,
}

impl std::fmt::Debug for MemoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegistry")
            .field("metadata_requests", &self.metadata_requests())
            .field("blob_requests", &self.blob_requests())
            .finish_non_exhaustive()
    }
}

impl MemoryRegistry {
    pub const ID: &'static str = "memory://registry";

    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `name@version` whose archive holds a generated `init.lua`.
    pub fn publish(&self, name: &str, version: &str, dependencies: &[(&str, &str)]) -> ContentHash {
        let archive = build_archive(&[("init.lua", &module_source(name, version))]);
        self.publish_archive(name, version, dependencies, archive)
    }

    /// Publish `name@version` with the given archive bytes.
    pub fn publish_archive(
        &self,
        name: &str,
        version: &str,
        dependencies: &[(&str, &str)],
        archive: Vec<u8>,
    ) -> ContentHash {
        let name = PackageName::new(name).expect("valid package name");
        let version = Version::parse(version).expect("valid version");
        let content_hash = ContentHash::of(&archive);
        let dependencies: BTreeMap<PackageName, VersionConstraint> = dependencies
            .iter()
            .map(|(dep, v)| {
                (
                    PackageName::new(dep).expect("valid dependency name"),
                    VersionConstraint::parse(v).expect("valid dependency version"),
                )
            })
            .collect();

        let mut state = self.state.lock().unwrap();
        state.blobs.insert(content_hash.clone(), archive);
        state.packages.insert(
            (name.clone(), version.clone()),
            PackageMetadata {
                name,
                version,
                content_hash: content_hash.clone(),
                dependencies,
            },
        );
        content_hash
    }

    /// Answer requests for `name@version` with the metadata of `as_name@as_version`.
    pub fn alias(&self, name: &str, version: &str, as_name: &str, as_version: &str) {
        let key = |n: &str, v: &str| {
            (PackageName::new(n).expect("valid name"), Version::parse(v).expect("valid version"))
        };
        self.state.lock().unwrap().aliases.insert(key(name, version), key(as_name, as_version));
    }

    /// Serve the blob for `hash` with its first byte flipped.
    pub fn corrupt_blob(&self, hash: &ContentHash) {
        self.state.lock().unwrap().corrupt.insert(hash.clone());
    }

    /// Serve `hash` intact again.
    pub fn repair_blob(&self, hash: &ContentHash) {
        self.state.lock().unwrap().corrupt.remove(hash);
    }

    /// Fail the next `count` requests of any kind with a transient network error.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().unwrap().pending_failures = count;
    }

    /// Take `delay` to answer each blob request, like a slow download.
    pub fn delay_blobs(&self, delay: Duration) {
        self.state.lock().unwrap().blob_delay = Some(delay);
    }

    pub fn metadata_requests(&self) -> usize {
        self.metadata_requests.load(Ordering::SeqCst)
    }

    pub fn blob_requests(&self) -> usize {
        self.blob_requests.load(Ordering::SeqCst)
    }

    /// Total number of requests served.
    pub fn requests(&self) -> usize {
        self.metadata_requests() + self.blob_requests()
    }

    fn take_failure(state: &mut RegistryState) -> Option<SourceError> {
        if state.pending_failures == 0 {
            return None;
        }
        state.pending_failures -= 1;
        Some(SourceError::Network("connection reset by peer".to_string()))
    }
}

#[async_trait]
impl PackageSource for MemoryRegistry {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn metadata(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> Result<PackageMetadata, SourceError> {
        self.metadata_requests.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if let Some(error) = Self::take_failure(&mut state) {
            return Err(error);
        }
        let requested = (name.clone(), version.clone());
        let key = state.aliases.get(&requested).cloned().unwrap_or(requested);
        state
            .packages
            .get(&key)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(format!("{name}@{version}")))
    }

    async fn fetch_blob(&self, hash: &ContentHash) -> Result<Vec<u8>, SourceError> {
        self.blob_requests.fetch_add(1, Ordering::SeqCst);
        let delay = self.state.lock().unwrap().blob_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        if let Some(error) = Self::take_failure(&mut state) {
            return Err(error);
        }
        let mut bytes = state
            .blobs
            .get(hash)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(format!("blob {hash}")))?;
        if state.corrupt.contains(hash) {
            if let Some(first) = bytes.first_mut() {
                *first ^= 0xff;
            }
        }
        Ok(bytes)
    }
}

/// A Polytoria place with one hand-written script in its `ScriptService`.
pub const SAMPLE_PLACE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<game>
  <Item class="Game">
    <Properties>
      <string name="Name">Sample Place</string>
    </Properties>
    <Item class="Environment">
      <Item class="Part">
        <Properties>
          <string name="Name">Baseplate</string>
          <vector3 name="Size"><X>100</X><Y>1</Y><Z>100</Z></vector3>
        </Properties>
      </Item>
    </Item>
    <!-- scripts -->
    <Item class="ScriptService">
      <Item class="Script">
        <Properties>
          <string name="Source">local logger = require(&quot;logger&quot;)
print(&apos;hello&apos;)</string>
          <string name="Name">Main</string>
        </Properties>
      </Item>
    </Item>
  </Item>
</game>
"#;

/// A temporary project directory with `mosaic.toml`, `place.poly` and a
/// separate cache directory.
pub struct ProjectFixture {
    temp: TempDir,
    dir: PathBuf,
}

impl Default for ProjectFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectFixture {
    /// A project named `demo` with [`SAMPLE_PLACE`] as its project file.
    pub fn new() -> Self {
        Self::with_place(SAMPLE_PLACE)
    }

    /// A project named `demo` with `place` as its project file.
    pub fn with_place(place: &str) -> Self {
        init_test_logging(None);
        let temp = TempDir::new().expect("create temp dir");
        let dir = temp.path().join("demo");
        std::fs::create_dir_all(&dir).expect("create project dir");
        let manifest = Manifest::new("demo").expect("new manifest");
        manifest.save(&dir.join(crate::constants::MANIFEST_FILE)).expect("write manifest");
        std::fs::write(dir.join("place.poly"), place).expect("write project file");
        Self {
            temp,
            dir,
        }
    }

    /// The project directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(crate::constants::MANIFEST_FILE)
    }

    pub fn lockfile_path(&self) -> PathBuf {
        self.dir.join(crate::constants::LOCKFILE_FILE)
    }

    pub fn project_path(&self) -> PathBuf {
        self.dir.join("place.poly")
    }

    /// Blob cache, outside the project directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.temp.path().join("cache")
    }

    pub fn read(&self, file: &str) -> String {
        std::fs::read_to_string(self.dir.join(file)).expect("read project file")
    }

    pub fn write(&self, file: &str, content: &str) {
        std::fs::write(self.dir.join(file), content).expect("write project file");
    }
}
