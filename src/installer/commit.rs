//! Staged, ordered replacement of the project artifacts.
//!
//! Every artifact that changes is first written in full to a temp file next
//! to its target. Only when all of them are staged are they renamed over
//! their targets, in the order they were staged. The renames run on a
//! blocking task, which keeps running even if the caller's future is dropped.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::core::MosaicError;
use crate::utils::stage_file;

struct StagedArtifact {
    label: &'static str,
    target: PathBuf,
    temp: NamedTempFile,
}

/// A set of artifacts waiting to be swapped into place.
#[derive(Default)]
pub struct StagedCommit {
    artifacts: Vec<StagedArtifact>,
}

impl std::fmt::Debug for StagedCommit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.artifacts.iter().map(|a| (a.label, &a.target))).finish()
    }
}

impl StagedCommit {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `content` for `target` unless the file already holds exactly it.
    ///
    /// Returns whether anything was staged.
    ///
    /// # Errors
    ///
    /// Fails if the temp file cannot be written.
    pub fn stage(&mut self, label: &'static str, target: &Path, content: &str) -> Result<bool> {
        if let Ok(current) = std::fs::read(target) {
            if current == content.as_bytes() {
                debug!(artifact = label, "Unchanged, not staged");
                return Ok(false);
            }
        }
        let temp = stage_file(target, content.as_bytes())
            .with_context(|| format!("Failed to stage {label} for {}", target.display()))?;
        debug!(artifact = label, temp = %temp.path().display(), "Staged");
        self.artifacts.push(StagedArtifact {
            label,
            target: target.to_path_buf(),
            temp,
        });
        Ok(true)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Rename every staged artifact over its target, returning the labels
    /// that were committed.
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::CommitFailed`] naming the artifacts already
    /// replaced when a rename fails. Artifacts after the failing one keep
    /// their previous content.
    pub async fn commit(self) -> Result<Vec<&'static str>> {
        if self.artifacts.is_empty() {
            return Ok(Vec::new());
        }
        tokio::task::spawn_blocking(move || self.commit_blocking())
            .await
            .context("Commit task panicked")?
    }

    fn commit_blocking(self) -> Result<Vec<&'static str>> {
        let mut committed = Vec::with_capacity(self.artifacts.len());
        for artifact in self.artifacts {
            let label = artifact.label;
            let target = artifact.target;
            if let Err(e) = artifact.temp.persist(&target) {
                return Err(MosaicError::CommitFailed {
                    committed: committed.iter().map(ToString::to_string).collect(),
                    reason: format!("cannot replace {} ({label}): {}", target.display(), e.error),
                }
                .into());
            }
            debug!(artifact = label, path = %target.display(), "Committed");
            committed.push(label);
        }
        Ok(committed)
    }
}
