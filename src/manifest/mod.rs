//! Manifest file parsing and format-preserving edits.
//!
//! The manifest (`mosaic.toml`) is owned by the user. Mosaic reads it with
//! serde and edits it through a [`toml_edit::DocumentMut`] kept alongside the
//! parsed data, so comments, key order and whitespace survive `install` and
//! `remove`.
//!
//! # File Format
//!
//! ```toml
//! [package]
//! name = "my-game"
//! version = "0.1.0"
//!
//! [dependencies]
//! logger = "1.2.0"
//! "acme/net" = "0.4.1"
//! ```
//!
//! Dependency names are normalized (trimmed, lowercased) and every value must
//! be an exact version.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use toml_edit::DocumentMut;

use crate::core::MosaicError;
use crate::models::PackageName;
use crate::version::VersionConstraint;

/// The `[package]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    /// Project name
    pub name: String,
    /// Project version, free-form
    pub version: String,
}

/// Shape used for deserialization only; values are validated afterwards.
#[derive(Debug, Deserialize)]
struct RawManifest {
    package: Option<PackageInfo>,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
}

/// A parsed `mosaic.toml`.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// The `[package]` table
    pub package: PackageInfo,
    /// Declared dependencies keyed by normalized name
    pub dependencies: BTreeMap<PackageName, VersionConstraint>,
    document: DocumentMut,
}

impl Manifest {
    /// Create a manifest for a new project.
    ///
    /// # Errors
    ///
    /// Fails only if the name cannot be written as a TOML string, which
    /// `toml_edit` escapes, so in practice this succeeds.
    pub fn new(project_name: &str) -> Result<Self> {
        let mut document = DocumentMut::new();
        let mut package = toml_edit::Table::new();
        package.insert("name", toml_edit::value(project_name));
        package.insert("version", toml_edit::value("0.1.0"));
        document.insert("package", toml_edit::Item::Table(package));
        document.insert("dependencies", toml_edit::Item::Table(toml_edit::Table::new()));

        Self::parse(&document.to_string(), "mosaic.toml")
    }

    /// Load and validate a manifest from disk.
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::ManifestNotFound`] when the file does not exist,
    /// otherwise the parse and validation errors of [`Manifest::parse`].
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MosaicError::ManifestNotFound.into());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read manifest file: {}", path.display()))?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Parse manifest text. `file` is only used in error messages.
    ///
    /// # Errors
    ///
    /// - [`MosaicError::ManifestParseError`] for invalid TOML, a missing
    ///   `[package]` table or two keys that normalize to the same name
    /// - [`MosaicError::InvalidPackageName`] / [`MosaicError::InvalidVersionConstraint`]
    ///   for bad dependency entries
    pub fn parse(content: &str, file: &str) -> Result<Self> {
        let parse_error = |reason: String| MosaicError::ManifestParseError {
            file: file.to_string(),
            reason,
        };

        let raw: RawManifest = toml::from_str(content).map_err(|e| parse_error(e.to_string()))?;
        let document: DocumentMut =
            content.parse().map_err(|e: toml_edit::TomlError| parse_error(e.to_string()))?;

        let package =
            raw.package.ok_or_else(|| parse_error("missing [package] table".to_string()))?;

        let mut dependencies = BTreeMap::new();
        for (key, value) in raw.dependencies {
            let name = PackageName::new(&key)?;
            let constraint = VersionConstraint::parse(&value)?;
            if dependencies.insert(name.clone(), constraint).is_some() {
                return Err(parse_error(format!("dependency '{name}' is declared more than once"))
                    .into());
            }
        }

        Ok(Self {
            package,
            dependencies,
            document,
        })
    }

    /// Whether `name` is a declared dependency.
    #[must_use]
    pub fn declares(&self, name: &PackageName) -> bool {
        self.dependencies.contains_key(name)
    }

    /// Declare or re-pin a dependency.
    ///
    /// Returns the previously declared constraint, if any. Re-declaring an
    /// equal constraint leaves the text as the user wrote it.
    pub fn add_dependency(
        &mut self,
        name: PackageName,
        constraint: VersionConstraint,
    ) -> Option<VersionConstraint> {
        if self.dependencies.get(&name) == Some(&constraint) {
            return Some(constraint);
        }
        let table = self.dependencies_table_mut();
        let existing_key = matching_key(table, &name);
        match existing_key {
            Some(key) => {
                if let Some(value) = table.get_mut(&key) {
                    // Keep the user's key spelling and trailing comment
                    let decor = value.as_value().map(|v| v.decor().clone());
                    *value = toml_edit::value(constraint.to_string());
                    if let (Some(decor), Some(new_value)) = (decor, value.as_value_mut()) {
                        *new_value.decor_mut() = decor;
                    }
                }
            }
            None => {
                table.insert(name.as_str(), toml_edit::value(constraint.to_string()));
            }
        }
        self.dependencies.insert(name, constraint)
    }

    /// Remove a declared dependency, returning its constraint.
    pub fn remove_dependency(&mut self, name: &PackageName) -> Option<VersionConstraint> {
        let removed = self.dependencies.remove(name)?;
        let table = self.dependencies_table_mut();
        if let Some(key) = matching_key(table, name) {
            table.remove(&key);
        }
        Some(removed)
    }

    /// The manifest text, with the user's formatting preserved.
    #[must_use]
    pub fn render(&self) -> String {
        self.document.to_string()
    }

    /// Write the manifest atomically.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        crate::utils::atomic_write(path, self.render().as_bytes())
            .with_context(|| format!("Cannot write manifest file: {}", path.display()))
    }

    fn dependencies_table_mut(&mut self) -> &mut dyn toml_edit::TableLike {
        let item = self.document.entry("dependencies").or_insert(toml_edit::table());
        if item.as_table_like().is_none() {
            *item = toml_edit::table();
        }
        match item.as_table_like_mut() {
            Some(table) => table,
            None => unreachable!("dependencies item was just replaced by a table"),
        }
    }
}

/// The key in `table` that normalizes to `name`, in the user's spelling.
fn matching_key(table: &dyn toml_edit::TableLike, name: &PackageName) -> Option<String> {
    table
        .iter()
        .map(|(key, _)| key)
        .find(|key| PackageName::new(key).is_ok_and(|parsed| &parsed == name))
        .map(ToString::to_string)
}
