//! Content-addressed blob cache.
//!
//! Package archives are stored once per sha256 hash and shared by every
//! project on the machine. Entries are immutable: a blob is written with a
//! temp file and an atomic rename and never modified afterwards.
//!
//! # Cache Directory Structure
//!
//! ```text
//! ~/.mosaic/cache/
//! └── blobs/
//!     └── sha256/
//!         └── 2c/
//!             └── 2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824
//! ```
//!
//! # Verification
//!
//! Bytes are hashed on every read, cached or downloaded. A cache entry that no
//! longer matches its name is reported, downloaded again, verified and
//! replaced. Downloaded bytes that do not match the expected hash are never
//! written to the cache and never returned.
//!
//! # Concurrency
//!
//! Within a store, fetches of the same hash are serialized by a per-hash
//! async mutex. Stores and processes sharing a cache directory also take the
//! [`BlobLock`] for the hash before downloading and look at the cache again
//! once they hold it, so a blob is downloaded once however many installs
//! want it at the same time.

pub mod archive;
pub mod lock;

use anyhow::{Context, Result};
use dashmap::DashMap;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::core::MosaicError;
use crate::models::{ContentHash, PackageName};
use crate::resolver::ResolvedPackage;
use crate::source::PackageSource;
use lock::BlobLock;

/// Verified, shared cache of package blobs.
pub struct BlobStore {
    dir: PathBuf,
    source: Arc<dyn PackageSource>,
    fetch_locks: DashMap<ContentHash, Arc<Mutex<()>>>,
    downloads: AtomicUsize,
    max_parallel: usize,
}

impl std::fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStore")
            .field("dir", &self.dir)
            .field("source", &self.source.id())
            .field("downloads", &self.downloads())
            .field("max_parallel", &self.max_parallel)
            .finish()
    }
}

impl BlobStore {
    /// Create a store rooted at `dir` that downloads missing blobs from `source`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, source: Arc<dyn PackageSource>, max_parallel: usize) -> Self {
        Self {
            dir: dir.into(),
            source,
            fetch_locks: DashMap::new(),
            downloads: AtomicUsize::new(0),
            max_parallel: max_parallel.max(1),
        }
    }

    /// Where the blob for `hash` lives (whether or not it exists).
    #[must_use]
    pub fn blob_path(&self, hash: &ContentHash) -> PathBuf {
        self.dir.join("blobs").join("sha256").join(&hash.hex()[..2]).join(hash.hex())
    }

    /// Number of blobs downloaded from the source by this store.
    #[must_use]
    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Return the verified bytes of `package`'s blob.
    ///
    /// # Errors
    ///
    /// - [`MosaicError::Integrity`] if the downloaded bytes do not match
    /// - [`MosaicError::Auth`] / [`MosaicError::NetworkError`] if the download fails
    /// - I/O errors writing the cache entry
    pub async fn fetch(&self, package: &ResolvedPackage) -> Result<Vec<u8>> {
        let hash = &package.content_hash;
        let lock = self.fetch_locks.entry(hash.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone();
        let _guard = lock.lock().await;

        let path = self.blob_path(hash);
        if let Some(bytes) = self.read_verified(package, &path, false).await? {
            return Ok(bytes);
        }

        let _blob_lock = BlobLock::acquire(&self.dir, hash).await?;
        if let Some(bytes) = self.read_verified(package, &path, true).await? {
            return Ok(bytes);
        }

        let bytes = self
            .source
            .fetch_blob(hash)
            .await
            .map_err(|e| e.into_error(&format!("downloading {}", package.id())))?;
        self.downloads.fetch_add(1, Ordering::SeqCst);

        let actual = ContentHash::of(&bytes);
        if &actual != hash {
            return Err(MosaicError::Integrity {
                package: package.id(),
                expected: hash.to_string(),
                actual: actual.to_string(),
            }
            .into());
        }

        let write_path = path.clone();
        let write_bytes = bytes.clone();
        tokio::task::spawn_blocking(move || crate::utils::atomic_write(&write_path, &write_bytes))
            .await
            .context("Cache write task panicked")?
            .with_context(|| format!("Failed to store blob {}", path.display()))?;
        debug!(package = %package.id(), path = %path.display(), "Stored blob");

        Ok(bytes)
    }

    /// Read the cache entry at `path` if it exists and matches its hash.
    ///
    /// With `report`, a miss is logged and a corrupt entry is warned about;
    /// the first look before taking the blob lock stays quiet.
    async fn read_verified(
        &self,
        package: &ResolvedPackage,
        path: &Path,
        report: bool,
    ) -> Result<Option<Vec<u8>>> {
        let hash = &package.content_hash;
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let actual = ContentHash::of(&bytes);
                if &actual == hash {
                    debug!(package = %package.id(), hash = hash.short(), "Cache hit");
                    return Ok(Some(bytes));
                }
                if report {
                    warn!(
                        package = %package.id(),
                        path = %path.display(),
                        expected = %hash,
                        actual = %actual,
                        "Cached blob is corrupt, downloading it again"
                    );
                }
                Ok(None)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if report {
                    debug!(package = %package.id(), hash = hash.short(), "Cache miss");
                }
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read cached blob {}", path.display())),
        }
    }

    /// Fetch every package concurrently, at most `max_parallel` at a time.
    ///
    /// The first failure aborts the remaining fetches.
    ///
    /// # Errors
    ///
    /// Returns the first error of any [`fetch`](Self::fetch).
    pub async fn fetch_all<'a>(
        &self,
        packages: impl IntoIterator<Item = &'a ResolvedPackage>,
    ) -> Result<BTreeMap<PackageName, Vec<u8>>> {
        stream::iter(packages)
            .map(|package| async move {
                self.fetch(package).await.map(|bytes| (package.name.clone(), bytes))
            })
            .buffer_unordered(self.max_parallel)
            .try_collect()
            .await
    }
}
