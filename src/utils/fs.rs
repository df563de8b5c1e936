//! File system helpers shared by the cache, the lockfile and the installer.
//!
//! Every file Mosaic writes goes through [`atomic_write`] or a staged
//! [`tempfile::NamedTempFile`] in the destination directory, so readers only
//! ever see the old content or the new content.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::constants::MANIFEST_FILE;
use crate::core::MosaicError;

/// Ensures a directory exists, creating it and all parent directories if necessary.
///
/// # Errors
///
/// Fails if the path exists but is not a directory, or creation fails.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    } else if !path.is_dir() {
        return Err(anyhow::anyhow!("Path exists but is not a directory: {}", path.display()));
    }
    Ok(())
}

/// Write `content` to a uniquely named temp file next to `path` and flush it.
///
/// The returned handle deletes the temp file when dropped, unless it is
/// persisted with [`tempfile::NamedTempFile::persist`].
///
/// # Errors
///
/// Fails if the parent directory cannot be created or the write fails.
pub fn stage_file(path: &Path, content: &[u8]) -> Result<tempfile::NamedTempFile> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    ensure_dir(parent)?;

    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;

    temp.write_all(content)
        .with_context(|| format!("Failed to write temp file for {}", path.display()))?;
    temp.as_file().sync_all().with_context(|| "Failed to sync file to disk")?;
    Ok(temp)
}

/// Atomically replace `path` with `content`.
///
/// The content is written to a temp file in the same directory and renamed
/// over the target, so concurrent writers of identical content are harmless.
///
/// # Errors
///
/// Fails if the temp file cannot be written or the rename fails.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let temp = stage_file(path, content)?;
    temp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;
    Ok(())
}

/// Finds the manifest by walking up from `start`.
///
/// # Errors
///
/// Returns [`MosaicError::ManifestNotFound`] when no directory up to the
/// filesystem root contains `mosaic.toml`.
pub fn find_manifest(start: &Path) -> Result<PathBuf> {
    let mut current = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());

    loop {
        let candidate = current.join(MANIFEST_FILE);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if !current.pop() {
            return Err(MosaicError::ManifestNotFound.into());
        }
    }
}
