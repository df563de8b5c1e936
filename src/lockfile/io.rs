//! Loading and rendering lockfiles. Installs write the rendered text through
//! the staged commit.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::core::MosaicError;

use super::LockFile;

const HEADER: &str = "# Auto-generated lockfile - DO NOT EDIT\n";

impl LockFile {
    /// Load a lockfile from disk.
    ///
    /// Returns `Ok(None)` when the file does not exist or is empty, so the
    /// caller can tell "never installed" apart from "installed nothing".
    ///
    /// # Errors
    ///
    /// - [`MosaicError::LockfileParseError`] for invalid TOML, invalid
    ///   entries or dangling dependency edges
    /// - a version error for lockfiles written by a newer Mosaic
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path).with_context(|| {
            format!(
                "Cannot read lockfile: {}\n\n\
                    Possible causes:\n\
                    - Permission denied (check file ownership)\n\
                    - File is locked by another process",
                path.display()
            )
        })?;

        if content.trim().is_empty() {
            return Ok(None);
        }

        let lockfile: Self = toml::from_str(&content).map_err(|e| MosaicError::LockfileParseError {
            file: path.display().to_string(),
            reason: e.to_string(),
        })?;

        if lockfile.version > Self::CURRENT_VERSION {
            return Err(MosaicError::Other {
                message: format!(
                    "Lockfile version {} is newer than supported version {}.\n\n\
                    This lockfile was created by a newer version of mosaic.\n\
                    Please update mosaic to the latest version to use this lockfile.",
                    lockfile.version,
                    Self::CURRENT_VERSION
                ),
            }
            .into());
        }

        if chrono::DateTime::parse_from_rfc3339(&lockfile.generated_at).is_err() {
            return Err(MosaicError::LockfileParseError {
                file: path.display().to_string(),
                reason: format!("generated_at '{}' is not an RFC 3339 timestamp", lockfile.generated_at),
            }
            .into());
        }

        lockfile.validate()?;
        Ok(Some(lockfile))
    }

    /// Render the lockfile text.
    ///
    /// # Errors
    ///
    /// Fails only if serialization fails.
    pub fn render(&self) -> Result<String> {
        let mut content = String::from(HEADER);
        content.push_str(&toml::to_string(self).context("Failed to serialize lockfile")?);
        Ok(content)
    }
}
