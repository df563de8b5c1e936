//! Package metadata and blob sources.
//!
//! The resolver and the blob store talk to the registry through the narrow
//! [`PackageSource`] trait: one metadata query per `name@version` and one
//! content-addressed blob read per hash. Implementations:
//!
//! - [`HttpRegistry`] - the Mosaic registry HTTP API
//! - [`RetryingSource`] - timeout and bounded retry around any source
//! - `test_utils::MemoryRegistry` - in-memory source for tests

mod http;
mod retry;

pub use http::HttpRegistry;
pub use retry::{RetryPolicy, RetryingSource};

use async_trait::async_trait;
use semver::Version;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::core::MosaicError;
use crate::models::{ContentHash, PackageName};
use crate::version::VersionConstraint;

/// What the registry knows about one published version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMetadata {
    /// Package name
    pub name: PackageName,
    /// Published version
    pub version: Version,
    /// Hash of the package blob
    pub content_hash: ContentHash,
    /// Declared dependencies
    pub dependencies: BTreeMap<PackageName, VersionConstraint>,
}

/// Errors returned by a [`PackageSource`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// The package, version or blob does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Credentials were missing or rejected (401/403).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The registry answered with a server error.
    #[error("registry error {status}: {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// The response could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl SourceError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_) | Self::Server { .. })
    }

    /// Convert into the crate error, naming the failed operation.
    #[must_use]
    pub fn into_error(self, operation: &str) -> MosaicError {
        match self {
            Self::Unauthorized(message) => MosaicError::Auth {
                operation: operation.to_string(),
                message,
            },
            other => MosaicError::NetworkError {
                operation: operation.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// A source of package metadata and blobs.
#[async_trait]
pub trait PackageSource: Send + Sync {
    /// Stable identifier recorded in the lockfile's `source` field.
    fn id(&self) -> &str;

    /// Metadata of exactly `name@version`.
    async fn metadata(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> Result<PackageMetadata, SourceError>;

    /// The bytes stored under `hash`. Callers verify the hash themselves.
    async fn fetch_blob(&self, hash: &ContentHash) -> Result<Vec<u8>, SourceError>;
}

#[async_trait]
impl<T: PackageSource + ?Sized> PackageSource for Arc<T> {
    fn id(&self) -> &str {
        (**self).id()
    }

    async fn metadata(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> Result<PackageMetadata, SourceError> {
        (**self).metadata(name, version).await
    }

    async fn fetch_blob(&self, hash: &ContentHash) -> Result<Vec<u8>, SourceError> {
        (**self).fetch_blob(hash).await
    }
}
