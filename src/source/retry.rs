//! Timeouts and bounded retries around a [`PackageSource`].
//!
//! Every request gets its own timeout. Transient failures (network errors,
//! timeouts, 5xx) are retried with exponential backoff up to
//! [`RetryPolicy::max_retries`] times; anything else fails immediately.

use async_trait::async_trait;
use semver::Version;
use std::future::Future;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::warn;

use super::{PackageMetadata, PackageSource, SourceError};
use crate::constants::{
    DEFAULT_MAX_RETRIES, DEFAULT_REQUEST_TIMEOUT_SECS, RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_MS,
};
use crate::models::{ContentHash, PackageName};

/// How long to wait for a request and how often to try again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Timeout for a single attempt
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: usize,
    /// Delay before the first retry; doubles on every retry
    pub base_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(RETRY_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Backoff delays: `base, 2 x base, 4 x base, ...` capped at `max_delay`.
    fn delays(&self) -> impl Iterator<Item = Duration> + Send {
        // ExponentialBackoff yields factor x 2^n for n = 1, 2, ...
        let factor = u64::try_from(self.base_delay.as_millis() / 2).unwrap_or(u64::MAX).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_delay)
            .take(self.max_retries)
    }
}

/// A [`PackageSource`] wrapper that applies a [`RetryPolicy`].
#[derive(Debug)]
pub struct RetryingSource<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: PackageSource> RetryingSource<S> {
    /// Wrap `inner`.
    pub const fn new(inner: S, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
        }
    }

    /// The wrapped source.
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    async fn attempt<T>(
        &self,
        request: impl Future<Output = Result<T, SourceError>>,
    ) -> Result<T, SourceError> {
        match tokio::time::timeout(self.policy.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(self.policy.timeout)),
        }
    }

    fn should_retry(what: &str, error: &SourceError) -> bool {
        let transient = error.is_transient();
        if transient {
            warn!(request = what, error = %error, "Registry request failed, retrying");
        }
        transient
    }
}

#[async_trait]
impl<S: PackageSource> PackageSource for RetryingSource<S> {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn metadata(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> Result<PackageMetadata, SourceError> {
        let what = format!("{name}@{version}");
        RetryIf::spawn(
            self.policy.delays(),
            || self.attempt(self.inner.metadata(name, version)),
            |e: &SourceError| Self::should_retry(&what, e),
        )
        .await
    }

    async fn fetch_blob(&self, hash: &ContentHash) -> Result<Vec<u8>, SourceError> {
        let what = format!("blob {}", hash.short());
        RetryIf::spawn(
            self.policy.delays(),
            || self.attempt(self.inner.fetch_blob(hash)),
            |e: &SourceError| Self::should_retry(&what, e),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails with the queued errors first, then succeeds.
    struct Scripted {
        failures: Mutex<Vec<SourceError>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl Scripted {
        fn new(failures: Vec<SourceError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl PackageSource for Scripted {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn metadata(
            &self,
            name: &PackageName,
            version: &Version,
        ) -> Result<PackageMetadata, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if let Some(error) = self.failures.lock().unwrap().pop() {
                return Err(error);
            }
            Ok(PackageMetadata {
                name: name.clone(),
                version: version.clone(),
                content_hash: ContentHash::of(b"x"),
                dependencies: BTreeMap::new(),
            })
        }

        async fn fetch_blob(&self, _hash: &ContentHash) -> Result<Vec<u8>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.failures.lock().unwrap().pop() {
                Some(error) => Err(error),
                None => Ok(b"x".to_vec()),
            }
        }
    }

    fn fast_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(200),
            max_retries,
            base_delay: Duration::from_millis(2),
            max_delay: Duration::from_millis(10),
        }
    }

    fn logger() -> (PackageName, Version) {
        (PackageName::new("logger").unwrap(), Version::new(1, 0, 0))
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let inner = Scripted::new(vec![
            SourceError::Server { status: 502, message: "bad gateway".into() },
            SourceError::Network("reset".into()),
        ]);
        let source = RetryingSource::new(inner, fast_policy(3));
        let (name, version) = logger();
        assert!(source.metadata(&name, &version).await.is_ok());
        assert_eq!(source.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let inner = Scripted::new(vec![SourceError::NotFound("logger@1.0.0".into())]);
        let source = RetryingSource::new(inner, fast_policy(3));
        let (name, version) = logger();
        let err = source.metadata(&name, &version).await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
        assert_eq!(source.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let inner = Scripted::new(vec![SourceError::Network("down".into()); 10]);
        let source = RetryingSource::new(inner, fast_policy(2));
        let err = source.fetch_blob(&ContentHash::of(b"x")).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(source.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_slow_requests_time_out() {
        let mut inner = Scripted::new(vec![]);
        inner.delay = Duration::from_secs(5);
        let source = RetryingSource::new(inner, fast_policy(0));
        let (name, version) = logger();
        let err = source.metadata(&name, &version).await.unwrap_err();
        assert_eq!(err, SourceError::Timeout(Duration::from_millis(200)));
    }

    #[test]
    fn test_delays_double_and_cap() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(500),
            max_retries: 4,
            ..RetryPolicy::default()
        };
        let delays: Vec<u128> = policy.delays().map(|d| d.as_millis()).collect();
        assert_eq!(delays, vec![200, 400, 500, 500]);
    }
}
