//! Shared data models for Mosaic operations
//!
//! Identifiers that cross module boundaries: package names, content hashes
//! and `name@version` specifications. All of them validate on construction,
//! so code holding one never re-checks it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::core::MosaicError;
use crate::version::VersionConstraint;

/// Prefix used when a hash is rendered for humans and lockfiles.
pub const SHA256_PREFIX: &str = "sha256:";

/// A normalized package identifier, optionally scoped (`scope/name`).
///
/// Rules, applied to each segment:
/// 1. Lowercase alphanumeric and hyphens only (a-z, 0-9, -)
/// 2. No leading or trailing hyphens, no `--`
/// 3. Length between 2 and 64 characters
///
/// Input is trimmed and lowercased before validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageName(String);

impl PackageName {
    /// Validate and normalize a package name.
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::InvalidPackageName`] naming the broken rule.
    pub fn new(raw: &str) -> Result<Self, MosaicError> {
        let normalized = raw.trim().to_ascii_lowercase();
        let invalid = |reason: &str| MosaicError::InvalidPackageName {
            name: raw.to_string(),
            reason: reason.to_string(),
        };

        if normalized.is_empty() {
            return Err(invalid("name must not be empty"));
        }

        let segments: Vec<&str> = normalized.split('/').collect();
        if segments.len() > 2 {
            return Err(invalid("only one level of scope is allowed (scope/name)"));
        }

        static SEGMENT: OnceLock<Regex> = OnceLock::new();
        let re = SEGMENT.get_or_init(|| {
            Regex::new(r"^[a-z0-9][a-z0-9-]*[a-z0-9]$").expect("static regex is valid")
        });

        for segment in &segments {
            if segment.len() < 2 || segment.len() > 64 {
                return Err(invalid("each segment must be 2 to 64 characters long"));
            }
            if !re.is_match(segment) {
                return Err(invalid(
                    "use lowercase letters, digits and hyphens, starting and ending with a letter or digit",
                ));
            }
            if segment.contains("--") {
                return Err(invalid("consecutive hyphens are not allowed"));
            }
        }

        Ok(Self(normalized))
    }

    /// The full name, including the scope when present.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The unscoped part of the name, used as the injected module's `Name`.
    #[must_use]
    pub fn leaf(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PackageName {
    type Err = MosaicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PackageName {
    type Error = MosaicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<PackageName> for String {
    fn from(value: PackageName) -> Self {
        value.0
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// SHA-256 digest identifying a blob.
///
/// Stored as 64 lowercase hex characters. [`Display`](fmt::Display) renders
/// the `sha256:` prefixed form used in the lockfile and project file;
/// [`hex`](Self::hex) gives the bare form used on the wire and in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash `bytes`.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Parse either `sha256:<hex>` or bare hex.
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::Other`] when the input is not 64 hex digits.
    pub fn parse(input: &str) -> Result<Self, MosaicError> {
        let trimmed = input.trim();
        let digits = trimmed.strip_prefix(SHA256_PREFIX).unwrap_or(trimmed);
        if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(MosaicError::Other {
                message: format!("Invalid sha256 content hash '{input}'"),
            });
        }
        Ok(Self(digits.to_ascii_lowercase()))
    }

    /// Bare lowercase hex digest.
    #[must_use]
    pub fn hex(&self) -> &str {
        &self.0
    }

    /// Abbreviated digest for log output.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SHA256_PREFIX}{}", self.0)
    }
}

impl FromStr for ContentHash {
    type Err = MosaicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = MosaicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentHash> for String {
    fn from(value: ContentHash) -> Self {
        value.to_string()
    }
}

/// A `name@version` request, as typed on the command line and stored for
/// lockfile dependency edges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageSpec {
    /// Package being requested
    pub name: PackageName,
    /// Version requirement
    pub constraint: VersionConstraint,
}

impl PackageSpec {
    /// Parse `name@version`; the version is mandatory.
    ///
    /// The split happens at the last `@`, so scoped names work unchanged.
    ///
    /// # Errors
    ///
    /// Fails when the version is missing or either half is invalid.
    pub fn parse(input: &str) -> Result<Self, MosaicError> {
        let Some((name, version)) = input.trim().rsplit_once('@') else {
            return Err(MosaicError::InvalidVersionConstraint {
                constraint: input.to_string(),
                reason: "expected name@version (an exact version is required)".to_string(),
            });
        };
        Ok(Self {
            name: PackageName::new(name)?,
            constraint: VersionConstraint::parse(version)?,
        })
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.constraint)
    }
}

impl FromStr for PackageSpec {
    type Err = MosaicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PackageSpec {
    type Error = MosaicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PackageSpec> for String {
    fn from(value: PackageSpec) -> Self {
        value.to_string()
    }
}
