//! Per-blob file locks shared by every process using a cache directory.
//!
//! A download holds the lock for its hash until the blob is stored, so a
//! second store or process waiting on the same hash finds the blob in the
//! cache instead of downloading it again. Locks are released on drop.

use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::models::ContentHash;

/// Exclusive lock on one blob of a cache directory.
#[derive(Debug)]
pub struct BlobLock {
    file: File,
    path: PathBuf,
}

impl BlobLock {
    /// Where the lock for `hash` lives under `cache_dir`.
    #[must_use]
    pub fn path(cache_dir: &Path, hash: &ContentHash) -> PathBuf {
        cache_dir.join(".locks").join(format!("{}.lock", hash.hex()))
    }

    /// Wait for the exclusive lock on `hash`.
    ///
    /// The wait runs on the blocking pool and has no timeout; holders only
    /// keep the lock for the length of one download.
    ///
    /// # Errors
    ///
    /// Fails if the `.locks` directory or the lock file cannot be created, or
    /// if the file system does not support locking.
    pub async fn acquire(cache_dir: &Path, hash: &ContentHash) -> Result<Self> {
        let path = Self::path(cache_dir, hash);
        if let Some(locks_dir) = path.parent() {
            tokio::fs::create_dir_all(locks_dir)
                .await
                .with_context(|| format!("Failed to create locks directory {}", locks_dir.display()))?;
        }

        let lock_path = path.clone();
        let file = tokio::task::spawn_blocking(move || -> Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&lock_path)
                .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;
            file.lock_exclusive()
                .with_context(|| format!("Failed to lock {}", lock_path.display()))?;
            Ok(file)
        })
        .await
        .context("Blob lock task panicked")??;

        debug!(path = %path.display(), "Acquired blob lock");
        Ok(Self {
            file,
            path,
        })
    }
}

impl Drop for BlobLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "Failed to release blob lock");
        } else {
            debug!(path = %self.path.display(), "Released blob lock");
        }
    }
}
