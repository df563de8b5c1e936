//! Error handling for Mosaic
//!
//! This module provides the error types and user-friendly error reporting for
//! the Mosaic installation pipeline. The error system is designed around two
//! core principles:
//! 1. **Strongly-typed errors** for precise error handling in code
//! 2. **User-friendly messages** with actionable suggestions for CLI users
//!
//! # Architecture
//!
//! - [`MosaicError`] - Enumerated error types for every failure in the pipeline
//! - [`ResolutionError`] - Failures of the dependency resolver
//! - [`ErrorContext`] - Wrapper that adds details and suggestions for display
//!
//! # Failure Semantics
//!
//! Every error raised before the commit phase of an operation leaves the
//! manifest, lockfile and project file untouched, so the operation can simply
//! be retried. The only error that can leave artifacts out of step is
//! [`MosaicError::CommitFailed`]; the next `mosaic install` reconciles them.
//!
//! # Examples
//!
//! ```rust,no_run
//! use mosaic_cli::core::{MosaicError, user_friendly_error};
//!
//! let error = MosaicError::ManifestNotFound;
//! let context = user_friendly_error(anyhow::Error::from(error));
//! context.display(); // Shows the error with a suggestion to run `mosaic init`
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// Dependency resolution failures.
///
/// Each variant names the package involved and who asked for it, so the
/// user can see which declaration to change.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// The registry has no such package or no such version of it.
    #[error("Package '{name}@{version}' not found (required by {requested_by})")]
    NotFound {
        /// Package name that was requested
        name: String,
        /// Exact version that was requested
        version: String,
        /// Who asked for it: `mosaic.toml` or `name@version`
        requested_by: String,
    },

    /// The same package is pinned to two different exact versions.
    ///
    /// Partial module loading has no meaningful semantics in a Polytoria
    /// project, so the resolver fails instead of picking one of the two.
    #[error(
        "Version conflict for '{name}': {first_requester} requires {first_version}, \
         but {second_requester} requires {second_version}"
    )]
    VersionConflict {
        /// Package pinned twice
        name: String,
        /// Version requested first during traversal
        first_version: String,
        /// Requester of `first_version`
        first_requester: String,
        /// Conflicting version
        second_version: String,
        /// Requester of `second_version`
        second_requester: String,
    },

    /// A package transitively depends on itself.
    #[error("Circular dependency detected: {}", .cycle.join(" -> "))]
    CycleDetected {
        /// The cycle as `name@version` entries; first and last are the same
        cycle: Vec<String>,
    },
}

/// The main error type for Mosaic operations.
///
/// # Error Categories
///
/// - **Resolution**: [`MosaicError::Resolution`]
/// - **Integrity**: [`MosaicError::Integrity`], [`MosaicError::InvalidPackage`]
/// - **File system**: [`MosaicError::FileSystemError`], [`MosaicError::CommitFailed`]
/// - **Registry**: [`MosaicError::Auth`], [`MosaicError::NetworkError`]
/// - **Parsing**: [`MosaicError::XmlParse`], [`MosaicError::ManifestParseError`],
///   [`MosaicError::LockfileParseError`]
/// - **User input**: [`MosaicError::InvalidPackageName`],
///   [`MosaicError::InvalidVersionConstraint`], [`MosaicError::DependencyNotDeclared`]
#[derive(Error, Debug)]
pub enum MosaicError {
    /// Dependency resolution failed
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Downloaded or cached content does not match its content hash
    ///
    /// Covers both tampering and truncated transfers. The offending bytes are
    /// never cached and never injected.
    #[error("Integrity check failed for '{package}': expected {expected}, got {actual}")]
    Integrity {
        /// Package whose blob failed verification
        package: String,
        /// Hash recorded in metadata or the lockfile
        expected: String,
        /// Hash of the bytes actually received
        actual: String,
    },

    /// The registry rejected our credentials
    ///
    /// Surfaced unmodified; Mosaic never issues or refreshes credentials itself.
    #[error("Authentication failed during {operation}: {message}")]
    Auth {
        /// Operation that was rejected
        operation: String,
        /// Message returned by the registry
        message: String,
    },

    /// Network error after retries were exhausted
    #[error("Network error during {operation}: {reason}")]
    NetworkError {
        /// The network operation that failed
        operation: String,
        /// Reason for the network failure
        reason: String,
    },

    /// The project file is not well-formed XML
    #[error("Cannot parse project file {file}: {reason}")]
    XmlParse {
        /// Path of the project file
        file: String,
        /// Parser message including the byte offset
        reason: String,
    },

    /// Manifest file (mosaic.toml) not found
    #[error("Manifest file mosaic.toml not found in current directory or any parent directory")]
    ManifestNotFound,

    /// Manifest parsing error
    #[error("Invalid manifest file syntax in {file}: {reason}")]
    ManifestParseError {
        /// Path to the manifest file that failed to parse
        file: String,
        /// Specific reason for the parsing failure
        reason: String,
    },

    /// Lockfile parsing error
    #[error("Invalid lockfile syntax in {file}: {reason}")]
    LockfileParseError {
        /// Path to the lockfile that failed to parse
        file: String,
        /// Specific reason for the parsing failure
        reason: String,
    },

    /// Package name does not follow the naming rules
    #[error("Invalid package name '{name}': {reason}")]
    InvalidPackageName {
        /// The rejected name
        name: String,
        /// Which rule it broke
        reason: String,
    },

    /// Invalid version constraint
    #[error("Invalid version constraint '{constraint}': {reason}")]
    InvalidVersionConstraint {
        /// The invalid version constraint string
        constraint: String,
        /// Why it was rejected
        reason: String,
    },

    /// `remove` was asked for a package that mosaic.toml does not declare
    #[error("'{name}' is not declared in mosaic.toml")]
    DependencyNotDeclared {
        /// The requested name
        name: String,
        /// Declared packages that pull it in transitively, if any
        required_by: Vec<String>,
        /// Closest declared name, if one is similar enough
        did_you_mean: Option<String>,
    },

    /// Package content is unusable (not a zip, no Lua source)
    #[error("Invalid package '{package}': {reason}")]
    InvalidPackage {
        /// Package name and version
        package: String,
        /// What is wrong with the archive
        reason: String,
    },

    /// No project file to inject modules into
    #[error("No .poly project file found in {dir}")]
    ProjectFileNotFound {
        /// Directory that was searched
        dir: String,
    },

    /// File system error
    #[error("File system error: {operation} {path}: {reason}")]
    FileSystemError {
        /// The file system operation that failed
        operation: String,
        /// Path where the file system error occurred
        path: String,
        /// Underlying cause
        reason: String,
    },

    /// Swapping staged artifacts into place failed part way through
    #[error("Commit interrupted after updating [{}]: {reason}", .committed.join(", "))]
    CommitFailed {
        /// Artifacts that were already replaced
        committed: Vec<String>,
        /// Underlying cause
        reason: String,
    },

    /// Other error
    #[error("{message}")]
    Other {
        /// Generic error message
        message: String,
    },
}

/// Error context wrapper that provides user-friendly error information
///
/// When displayed, errors show:
/// 1. **Error**: The main error message in red
/// 2. **Details**: Additional context about the error in yellow (optional)
/// 3. **Suggestion**: Actionable steps to resolve the issue in green (optional)
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying Mosaic error
    pub error: MosaicError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context from a [`MosaicError`]
    #[must_use]
    pub const fn new(error: MosaicError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details explaining the error
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Display the error context to stderr with terminal colors
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error to a user-friendly [`ErrorContext`] with actionable suggestions
///
/// Recognizes [`MosaicError`] (anywhere in a context chain), [`std::io::Error`]
/// and TOML errors; anything else is reported with its full cause chain.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let chain: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();

    let error = match error.downcast::<MosaicError>() {
        Ok(mosaic_error) => return create_error_context(mosaic_error),
        Err(error) => error,
    };

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        if io_error.kind() == std::io::ErrorKind::PermissionDenied {
            return ErrorContext::new(MosaicError::FileSystemError {
                operation: "access".to_string(),
                path: "unknown".to_string(),
                reason: io_error.to_string(),
            })
            .with_suggestion("Check file ownership and permissions of the project directory");
        }
    }

    if let Some(toml_error) = error.downcast_ref::<toml::de::Error>() {
        return ErrorContext::new(MosaicError::ManifestParseError {
            file: crate::constants::MANIFEST_FILE.to_string(),
            reason: toml_error.to_string(),
        })
        .with_suggestion("Check the TOML syntax. Verify quotes, brackets, and key names");
    }

    let mut message = error.to_string();
    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }

    ErrorContext::new(MosaicError::Other {
        message,
    })
}

/// Attach the suggestion and details that fit each [`MosaicError`] variant.
fn create_error_context(error: MosaicError) -> ErrorContext {
    match &error {
        MosaicError::Resolution(ResolutionError::VersionConflict {
            name,
            ..
        }) => {
            let suggestion = format!(
                "Pin '{name}' in mosaic.toml to the version every dependent expects, \
                 or upgrade the dependents so they agree"
            );
            ErrorContext::new(error)
                .with_details("Mosaic installs exactly one version of every package")
                .with_suggestion(suggestion)
        }
        MosaicError::Resolution(ResolutionError::NotFound {
            ..
        }) => ErrorContext::new(error)
            .with_suggestion("Check the package name and version on the registry"),
        MosaicError::Resolution(ResolutionError::CycleDetected {
            ..
        }) => ErrorContext::new(error)
            .with_details("Packages in the cycle must be republished without the circular requirement"),
        MosaicError::Integrity {
            ..
        } => ErrorContext::new(error)
            .with_details("The content did not match its sha256 hash and was discarded")
            .with_suggestion("Run the command again; if it keeps failing, report the package to the registry"),
        MosaicError::Auth {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Log in again or set MOSAIC_TOKEN to a valid registry token"),
        MosaicError::NetworkError {
            ..
        } => ErrorContext::new(error)
            .with_details("Nothing was written; the operation can be retried safely")
            .with_suggestion("Check your connection or the registry URL (MOSAIC_REGISTRY_URL)"),
        MosaicError::XmlParse {
            ..
        } => ErrorContext::new(error)
            .with_details("The project file was not modified")
            .with_suggestion("Fix the XML (unclosed or mismatched tags) and run the command again"),
        MosaicError::ManifestNotFound => ErrorContext::new(error)
            .with_suggestion("Run 'mosaic init' to create a mosaic.toml in this directory"),
        MosaicError::ManifestParseError {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Check the TOML syntax in mosaic.toml"),
        MosaicError::LockfileParseError {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Delete mosaic.lock and run 'mosaic install' to regenerate it"),
        MosaicError::InvalidPackageName {
            ..
        } => ErrorContext::new(error).with_details(
            "Names use lowercase letters, digits and single hyphens, optionally scoped as scope/name",
        ),
        MosaicError::InvalidVersionConstraint {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Use an exact version such as 1.2.0"),
        MosaicError::DependencyNotDeclared {
            required_by,
            did_you_mean,
            ..
        } => {
            let details = (!required_by.is_empty()).then(|| {
                format!("It is installed as a dependency of: {}", required_by.join(", "))
            });
            let suggestion = did_you_mean.as_ref().map(|candidate| format!("Did you mean '{candidate}'?"));
            ErrorContext {
                error,
                suggestion,
                details,
            }
        }
        MosaicError::ProjectFileNotFound {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Save your Polytoria place as a .poly file next to mosaic.toml"),
        MosaicError::CommitFailed {
            ..
        } => ErrorContext::new(error)
            .with_details("Some artifacts were updated and others were not")
            .with_suggestion("Run 'mosaic install' to reconcile the project"),
        _ => ErrorContext::new(error),
    }
}
