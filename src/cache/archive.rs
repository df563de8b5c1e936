//! Extraction of module source from package archives.
//!
//! Packages are zip archives of the published project. The module injected
//! into the project file is `init.lua` at the archive root when present,
//! otherwise the lexicographically first `.lua` entry.

use std::io::{Cursor, Read};

use crate::core::MosaicError;

/// Entry name that marks a package's main module.
pub const ENTRY_MODULE: &str = "init.lua";

/// Extract the module source from a verified package archive.
///
/// `package` is only used in error messages.
///
/// # Errors
///
/// Returns [`MosaicError::InvalidPackage`] if the bytes are not a zip
/// archive, the archive holds no `.lua` file, or the chosen file is not
/// valid UTF-8.
pub fn extract_module_source(package: &str, bytes: &[u8]) -> Result<String, MosaicError> {
    let invalid = |reason: String| MosaicError::InvalidPackage {
        package: package.to_string(),
        reason,
    };

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| invalid(format!("not a zip archive ({e})")))?;

    let mut lua_files: Vec<String> = archive
        .file_names()
        .filter(|name| !name.ends_with('/') && name.to_ascii_lowercase().ends_with(".lua"))
        .map(ToString::to_string)
        .collect();
    lua_files.sort();

    let chosen = if lua_files.iter().any(|name| name == ENTRY_MODULE) {
        ENTRY_MODULE.to_string()
    } else {
        lua_files
            .into_iter()
            .next()
            .ok_or_else(|| invalid("archive contains no .lua file".to_string()))?
    };

    let mut file = archive
        .by_name(&chosen)
        .map_err(|e| invalid(format!("cannot read {chosen} ({e})")))?;
    let mut source = String::new();
    file.read_to_string(&mut source)
        .map_err(|e| invalid(format!("{chosen} is not valid UTF-8 text ({e})")))?;
    Ok(source)
}
