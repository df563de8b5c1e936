//! Version constraints for Mosaic dependencies.
//!
//! Mosaic pins every dependency to an exact semantic version. The constraint
//! type is still an enum so that range constraints (`^1.2`, `~1.2.0`, ...)
//! can be added as new variants; the resolver only asks a constraint for the
//! version it [`selects`](VersionConstraint::select) among candidates.
//!
//! # Accepted Syntax
//!
//! - `1.2.0`, `v1.2.0`, `=1.2.0` - exact version (leading `v`/`=` is dropped)
//! - `1.2.0-beta.1` - prerelease versions are exact versions too
//!
//! Anything that looks like a range is rejected with an explicit message
//! instead of being silently treated as exact.

use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::MosaicError;

/// Characters that only appear in range syntax.
const RANGE_MARKERS: &[char] = &['^', '~', '*', '>', '<', '|', ',', ' '];

/// A version requirement declared in the manifest or by a package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VersionConstraint {
    /// Exactly this version.
    Exact(Version),
    // Range variants (caret, tilde, comparison sets) belong here. The
    // selection policy for them (highest vs. lowest compatible) is undecided,
    // which is why `select` is the only way the resolver consumes a constraint.
}

impl VersionConstraint {
    /// Parse a constraint string.
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::InvalidVersionConstraint`] for empty input, range
    /// syntax, and strings that are not valid semantic versions.
    pub fn parse(input: &str) -> Result<Self, MosaicError> {
        let trimmed = input.trim();
        let invalid = |reason: &str| MosaicError::InvalidVersionConstraint {
            constraint: input.to_string(),
            reason: reason.to_string(),
        };

        if trimmed.is_empty() {
            return Err(invalid("version must not be empty"));
        }
        let bare = trimmed.strip_prefix('=').unwrap_or(trimmed).trim_start();
        if bare.contains(RANGE_MARKERS) || bare.split('.').any(|part| part == "x" || part == "X") {
            return Err(invalid("range constraints are not supported, use an exact version"));
        }
        let bare = bare.strip_prefix('v').unwrap_or(bare);

        Version::parse(bare)
            .map(Self::Exact)
            .map_err(|e| invalid(&format!("not a semantic version ({e})")))
    }

    /// Constraint matching exactly `version`.
    #[must_use]
    pub const fn exact(version: Version) -> Self {
        Self::Exact(version)
    }

    /// Whether `version` satisfies the constraint.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Exact(pinned) => pinned == version,
        }
    }

    /// Pick the version to install from `candidates`.
    ///
    /// For exact constraints the candidates are irrelevant: the pinned
    /// version is returned and the metadata lookup decides whether it exists.
    #[must_use]
    pub fn select<'a>(&'a self, _candidates: &'a [Version]) -> &'a Version {
        match self {
            Self::Exact(pinned) => pinned,
        }
    }

    /// The version an exact constraint pins.
    #[must_use]
    pub const fn pinned(&self) -> &Version {
        match self {
            Self::Exact(pinned) => pinned,
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(version) => write!(f, "{version}"),
        }
    }
}

impl TryFrom<String> for VersionConstraint {
    type Error = MosaicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VersionConstraint> for String {
    fn from(value: VersionConstraint) -> Self {
        value.to_string()
    }
}

impl std::str::FromStr for VersionConstraint {
    type Err = MosaicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
