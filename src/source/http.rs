//! Client for the Mosaic registry HTTP API.
//!
//! Endpoints:
//!
//! - `GET {registry}/packages/{name}/versions` - JSON array of published
//!   versions: `{version, lua_source_url: "/packages/blobs/<hex>", dependencies}`
//! - `GET {registry}/packages/blobs/{hex}` - raw blob bytes
//!
//! Scoped names are sent with the `/` percent-encoded.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use semver::Version;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::{PackageMetadata, PackageSource, SourceError};
use crate::models::{ContentHash, PackageName};
use crate::version::VersionConstraint;

const USER_AGENT_VALUE: &str = concat!("mosaic/", env!("CARGO_PKG_VERSION"));

/// One element of the `/versions` response.
#[derive(Debug, Deserialize)]
struct WireVersion {
    version: String,
    lua_source_url: String,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
}

/// Registry client.
pub struct HttpRegistry {
    client: Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for HttpRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRegistry")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpRegistry {
    /// Create a client for `base_url`, optionally authenticating with a bearer token.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed (TLS backend missing).
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            timeout,
        })
    }

    fn headers(&self) -> Result<HeaderMap, SourceError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| SourceError::Unauthorized("token contains invalid characters".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    async fn get(&self, url: &str, what: &str) -> Result<Response, SourceError> {
        debug!(url, "GET");
        let response = self
            .client
            .get(url)
            .headers(self.headers()?)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::Timeout(self.timeout)
                } else {
                    SourceError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        let message = error_message(&message).unwrap_or_else(|| status.to_string());
        Err(match status {
            StatusCode::NOT_FOUND => SourceError::NotFound(what.to_string()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Unauthorized(message),
            StatusCode::TOO_MANY_REQUESTS => SourceError::Server {
                status: status.as_u16(),
                message,
            },
            _ if status.is_server_error() => SourceError::Server {
                status: status.as_u16(),
                message,
            },
            _ => SourceError::InvalidResponse(format!("unexpected status {status}: {message}")),
        })
    }
}

/// The registry reports errors as `{"error": "..."}`; fall back to the raw text.
fn error_message(body: &str) -> Option<String> {
    if body.trim().is_empty() {
        return None;
    }
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| json["error"].as_str().map(ToString::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    Some(message)
}

fn encode_name(name: &PackageName) -> String {
    name.as_str().replace('/', "%2F")
}

/// `lua_source_url` of a version whose source has not been uploaded yet.
const PENDING_UPLOAD: &str = "tbd";

fn to_metadata(name: &PackageName, wire: WireVersion) -> Result<PackageMetadata, SourceError> {
    let invalid = |what: String| SourceError::InvalidResponse(format!("{name}@{}: {what}", wire.version));

    let version = Version::parse(&wire.version).map_err(|e| invalid(format!("bad version ({e})")))?;
    if wire.lua_source_url == PENDING_UPLOAD {
        return Err(SourceError::NotFound(format!("{name}@{version} (source not uploaded yet)")));
    }
    let hash_part = wire.lua_source_url.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    let content_hash = ContentHash::parse(hash_part)
        .map_err(|_| invalid(format!("blob url '{}' does not name a sha256 hash", wire.lua_source_url)))?;

    let mut dependencies = BTreeMap::new();
    for (dep, constraint) in &wire.dependencies {
        let dep_name = PackageName::new(dep).map_err(|e| invalid(e.to_string()))?;
        let constraint = VersionConstraint::parse(constraint).map_err(|e| invalid(e.to_string()))?;
        dependencies.insert(dep_name, constraint);
    }

    Ok(PackageMetadata {
        name: name.clone(),
        version,
        content_hash,
        dependencies,
    })
}

#[async_trait]
impl PackageSource for HttpRegistry {
    fn id(&self) -> &str {
        &self.base_url
    }

    async fn metadata(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> Result<PackageMetadata, SourceError> {
        let url = format!("{}/packages/{}/versions", self.base_url, encode_name(name));
        let response = self.get(&url, &format!("package '{name}'")).await?;
        let versions: Vec<WireVersion> = response
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(format!("versions of '{name}': {e}")))?;

        let wire = versions
            .into_iter()
            .find(|v| Version::parse(&v.version).is_ok_and(|parsed| &parsed == version))
            .ok_or_else(|| SourceError::NotFound(format!("{name}@{version}")))?;
        to_metadata(name, wire)
    }

    async fn fetch_blob(&self, hash: &ContentHash) -> Result<Vec<u8>, SourceError> {
        let url = format!("{}/packages/blobs/{}", self.base_url, hash.hex());
        let response = self.get(&url, &format!("blob {hash}")).await?;
        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout(self.timeout)
            } else {
                SourceError::Network(e.to_string())
            }
        })?;
        Ok(bytes.to_vec())
    }
}
