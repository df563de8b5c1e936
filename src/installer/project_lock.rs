//! Advisory lock serializing install and remove operations on one project.
//!
//! The lock is an OS file lock on `.mosaic/.locks/project.lock` in the
//! project directory. It is held from resolution until the commit finishes
//! and released when the guard is dropped, including on errors and unwinding.
//! The lock file itself is left in place; deleting it would let a waiting
//! process lock an unlinked inode while a third process creates a new one.

use crate::constants::{
    MAX_BACKOFF_DELAY_MS, PROJECT_STATE_DIR, STARTING_BACKOFF_DELAY_MS, default_lock_timeout,
};
use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::debug;

/// Exclusive lock on a project directory.
#[derive(Debug)]
pub struct ProjectLock {
    /// Lock is released when the handle closes
    file: Arc<File>,
    path: PathBuf,
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(self.file.as_ref()) {
            debug!(path = %self.path.display(), error = %e, "Failed to unlock project lock");
        }
        debug!(path = %self.path.display(), "Project lock released");
    }
}

impl ProjectLock {
    /// Path of the lock file for `project_dir`.
    #[must_use]
    pub fn path_for(project_dir: &Path) -> PathBuf {
        project_dir.join(PROJECT_STATE_DIR).join(".locks").join("project.lock")
    }

    /// Acquire the project lock, waiting up to the default timeout.
    ///
    /// # Errors
    ///
    /// Fails if the lock directory cannot be created or another process holds
    /// the lock for longer than the timeout.
    pub async fn acquire(project_dir: &Path) -> Result<Self> {
        Self::acquire_with_timeout(project_dir, default_lock_timeout()).await
    }

    /// Acquire the project lock, waiting up to `timeout`.
    ///
    /// Attempts are non-blocking and retried after the delays of
    /// [`backoff_delays`]: 10ms, 100ms, then 500ms from there on.
    ///
    /// # Errors
    ///
    /// Returns a timeout error if the lock is not acquired within `timeout`.
    pub async fn acquire_with_timeout(project_dir: &Path, timeout: Duration) -> Result<Self> {
        let path = Self::path_for(project_dir);
        debug!(path = %path.display(), "Waiting for project lock");

        if let Some(locks_dir) = path.parent() {
            tokio::fs::create_dir_all(locks_dir).await.with_context(|| {
                format!("Failed to create project locks directory: {}", locks_dir.display())
            })?;
        }

        let open_path = path.clone();
        let file = tokio::task::spawn_blocking(move || {
            OpenOptions::new().create(true).write(true).truncate(false).open(&open_path)
        })
        .await
        .context("spawn_blocking panicked")?
        .with_context(|| format!("Failed to open lock file: {}", path.display()))?;
        let file = Arc::new(file);

        let start = std::time::Instant::now();
        for delay in backoff_delays() {
            let attempt = Arc::clone(&file);
            let locked = tokio::task::spawn_blocking(move || attempt.try_lock_exclusive())
                .await
                .context("spawn_blocking panicked")?;

            if let Ok(true) = locked {
                debug!(
                    path = %path.display(),
                    wait_ms = start.elapsed().as_millis(),
                    "Project lock acquired"
                );
                return Ok(Self {
                    file,
                    path,
                });
            }

            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(delay.min(remaining)).await;
        }

        Err(anyhow::anyhow!(
            "Timeout acquiring project lock {} after {:?}; is another mosaic command running?",
            path.display(),
            timeout
        ))
    }
}

/// Waits between lock attempts, growing tenfold up to the cap.
fn backoff_delays() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(STARTING_BACKOFF_DELAY_MS)
        .max_delay(Duration::from_millis(MAX_BACKOFF_DELAY_MS))
}
