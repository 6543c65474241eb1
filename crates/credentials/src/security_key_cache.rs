//! Temporary security-key cache.
//!
//! Holds the AK/SK snapshot every AK/SK-signed request uses, and refreshes
//! it on demand when it comes within [`REFRESH_WINDOW`] of expiry.
//!
//! # Architecture
//!
//! ```text
//! refresh_if_needed()
//!   → read snapshot (RwLock, no await)
//!   → fresh? return it
//!   → acquire refresh mutex (async, one refresher at a time)
//!   → re-read snapshot: another task may have refreshed while we waited
//!   → still stale? fetch from the CredentialSource
//!   → swap the new Arc<Credentials> in
//! ```
//!
//! Readers that only need the current keys call [`SecurityKeyCache::current`],
//! which never blocks on a refresh in progress.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use chrono::Utc;
use fail::fail_point;
use parking_lot::RwLock;

use crate::{
    credentials::{Credentials, REFRESH_WINDOW},
    error::{AuthError, Result},
};

/// Issues fresh temporary credentials.
///
/// Implemented by the instance metadata source and the assume-role
/// exchange.
#[async_trait]
pub trait CredentialSource: Send + Sync + fmt::Debug {
    /// Fetches a new credential snapshot.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] describing why no credentials were issued.
    async fn fetch(&self) -> Result<Credentials>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Cache for the active AK/SK credentials.
///
/// Long-lived keys are held with no source and never refresh. Temporary
/// keys carry the [`CredentialSource`] that issued them.
pub struct SecurityKeyCache {
    current: RwLock<Arc<Credentials>>,
    source: Option<Arc<dyn CredentialSource>>,
    /// Serializes refreshes. Held across the fetch.
    refresh_lock: tokio::sync::Mutex<()>,
    refresh_count: AtomicU64,
}

impl fmt::Debug for SecurityKeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityKeyCache")
            .field("current", &*self.current.read())
            .field("source", &self.source.as_ref().map(|s| s.name()))
            .field("refresh_count", &self.refresh_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl SecurityKeyCache {
    /// Creates a cache for credentials that are never refreshed.
    #[must_use]
    pub fn fixed(credentials: Credentials) -> Self {
        Self::build(credentials, None)
    }

    /// Creates a cache that refreshes from `source`.
    #[must_use]
    pub fn refreshable(credentials: Credentials, source: Arc<dyn CredentialSource>) -> Self {
        Self::build(credentials, Some(source))
    }

    fn build(credentials: Credentials, source: Option<Arc<dyn CredentialSource>>) -> Self {
        Self {
            current: RwLock::new(Arc::new(credentials)),
            source,
            refresh_lock: tokio::sync::Mutex::new(()),
            refresh_count: AtomicU64::new(0),
        }
    }

    /// Returns the current snapshot without checking expiry.
    #[must_use]
    pub fn current(&self) -> Arc<Credentials> {
        self.current.read().clone()
    }

    /// Returns `true` if the current credentials carry a security token.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.current.read().security_token().is_some()
    }

    /// Returns `true` if the cache can refresh itself.
    #[must_use]
    pub fn is_refreshable(&self) -> bool {
        self.source.is_some()
    }

    /// Number of completed refreshes.
    #[must_use]
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::Relaxed)
    }

    /// Returns live credentials, refreshing first if the current ones
    /// expire within [`REFRESH_WINDOW`].
    ///
    /// Concurrent callers that find the keys stale wait for a single
    /// refresh and all observe its result.
    ///
    /// # Errors
    ///
    /// Returns the source's error if the refresh fails. The previous
    /// snapshot stays in place.
    #[tracing::instrument(skip(self), fields(source = self.source.as_ref().map(|s| s.name())))]
    pub async fn refresh_if_needed(&self) -> Result<Arc<Credentials>> {
        let snapshot = self.current();
        let Some(source) = &self.source else {
            return Ok(snapshot);
        };
        if !snapshot.needs_refresh(Utc::now()) {
            return Ok(snapshot);
        }

        let _guard = self.refresh_lock.lock().await;

        let snapshot = self.current();
        if !snapshot.needs_refresh(Utc::now()) {
            tracing::debug!("security key refreshed by another task");
            return Ok(snapshot);
        }

        fail_point!("security-key-before-refresh", |_| {
            Err(AuthError::metadata("injected failure before security key refresh"))
        });

        tracing::debug!(
            expires_at = ?snapshot.expires_at(),
            window_secs = REFRESH_WINDOW.as_secs(),
            "security key near expiry, refreshing"
        );
        let fresh = match source.fetch().await {
            Ok(fresh) => Arc::new(fresh),
            Err(err) => {
                tracing::warn!(error = %err, "security key refresh failed");
                return Err(err);
            },
        };

        *self.current.write() = Arc::clone(&fresh);
        self.refresh_count.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            source = source.name(),
            access_key = fresh.access_key(),
            expires_at = ?fresh.expires_at(),
            "security key refreshed"
        );
        Ok(fresh)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Debug, Default)]
    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CredentialSource for CountingSource {
        async fn fetch(&self) -> Result<Credentials> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(Credentials::new(format!("AK{n}"), "SK")
                .with_security_token("STS")
                .with_expiry(Utc::now() + chrono::Duration::hours(1)))
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn expired() -> Credentials {
        Credentials::new("AK0", "SK")
            .with_security_token("STS")
            .with_expiry(Utc::now() - chrono::Duration::minutes(1))
    }

    #[tokio::test]
    async fn test_fixed_cache_never_refreshes() {
        let cache = SecurityKeyCache::fixed(expired());
        let creds = cache.refresh_if_needed().await.unwrap();
        assert_eq!(creds.access_key(), "AK0");
        assert_eq!(cache.refresh_count(), 0);
        assert!(!cache.is_refreshable());
    }

    #[tokio::test]
    async fn test_fresh_credentials_are_not_refreshed() {
        let source = Arc::new(CountingSource::default());
        let fresh = Credentials::new("AK0", "SK").with_expiry(Utc::now() + chrono::Duration::hours(2));
        let cache = SecurityKeyCache::refreshable(fresh, source.clone());

        cache.refresh_if_needed().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_credentials_refresh_once() {
        let source = Arc::new(CountingSource::default());
        let cache = SecurityKeyCache::refreshable(expired(), source.clone());

        let creds = cache.refresh_if_needed().await.unwrap();
        assert_eq!(creds.access_key(), "AK1");
        assert_eq!(cache.current().access_key(), "AK1");

        cache.refresh_if_needed().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.refresh_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refresh_is_single_flight() {
        let source = Arc::new(CountingSource::default());
        let cache = Arc::new(SecurityKeyCache::refreshable(expired(), source.clone()));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            tasks.spawn(async move { cache.refresh_if_needed().await.unwrap().access_key().to_owned() });
        }
        while let Some(key) = tasks.join_next().await {
            assert_eq!(key.unwrap(), "AK1");
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[derive(Debug)]
    struct FailingSource;

    #[async_trait]
    impl CredentialSource for FailingSource {
        async fn fetch(&self) -> Result<Credentials> {
            Err(AuthError::metadata("status code = 500"))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let cache = SecurityKeyCache::refreshable(expired(), Arc::new(FailingSource));
        assert!(cache.refresh_if_needed().await.is_err());
        assert_eq!(cache.current().access_key(), "AK0");
        assert!(cache.is_temporary());
    }
}
