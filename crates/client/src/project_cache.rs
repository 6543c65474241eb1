//! Region to project-ID cache.
//!
//! One async mutex guards the whole map and is held across the upstream
//! list call, so concurrent callers for an unseen region produce a single
//! query. Callers asking for different unseen regions also queue behind
//! that one call. Entries are never evicted.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use fail::fail_point;
use hwcloud_credentials::AuthenticatedClient;
use hwcloud_transport::TransportError;
use tokio::sync::Mutex;

use crate::error::{ClientError, Result};

/// Lazily populated region to project-ID map.
#[derive(Debug, Default)]
pub struct ProjectIdCache {
    entries: Mutex<HashMap<String, String>>,
    lookups: AtomicU64,
}

impl ProjectIdCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cache that already knows `region`'s project.
    #[must_use]
    pub fn seeded(region: impl Into<String>, project_id: impl Into<String>) -> Self {
        let entries = HashMap::from([(region.into(), project_id.into())]);
        Self { entries: Mutex::new(entries), lookups: AtomicU64::new(0) }
    }

    /// Returns the cached project ID for `region` without querying.
    pub async fn cached(&self, region: &str) -> Option<String> {
        self.entries.lock().await.get(region).cloned()
    }

    /// Number of upstream list calls made so far.
    #[must_use]
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Returns `region`'s project ID, listing the domain's projects on a
    /// miss.
    ///
    /// Every project in the answer is cached, not just the requested one.
    ///
    /// # Errors
    ///
    /// - [`ClientError::ProjectLookup`] if the list call fails
    /// - [`ClientError::ProjectNotFound`] if no project is named `region`
    #[tracing::instrument(skip(self, client), fields(domain_id = client.domain_id()))]
    pub async fn get_or_load(&self, region: &str, client: &AuthenticatedClient) -> Result<String> {
        let mut entries = self.entries.lock().await;
        if let Some(project_id) = entries.get(region) {
            return Ok(project_id.clone());
        }

        fail_point!("project-cache-before-list", |_| {
            Err(ClientError::ProjectLookup {
                region: region.to_owned(),
                source: TransportError::connection("injected failure before project list"),
            })
        });

        self.lookups.fetch_add(1, Ordering::Relaxed);
        let projects = client
            .list_projects(client.domain_id(), Some(region), false)
            .await
            .map_err(|source| ClientError::ProjectLookup { region: region.to_owned(), source })?;

        for project in &projects {
            entries.insert(project.name.clone(), project.id.clone());
        }
        tracing::info!(region, cached = projects.len(), "project IDs cached");

        entries
            .get(region)
            .cloned()
            .ok_or_else(|| ClientError::ProjectNotFound { region: region.to_owned() })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use hwcloud_credentials::{
        ClientScope, Credentials, SecurityKeyCache, SigningContext,
    };
    use hwcloud_transport::{
        RetryConfig, RetryingTransport, RoundTrip,
        testutil::{ScriptedTransport, Step},
    };
    use serde_json::json;

    use super::*;

    fn client(fake: &Arc<ScriptedTransport>) -> AuthenticatedClient {
        let transport = RetryingTransport::new(
            Arc::clone(fake) as Arc<dyn RoundTrip>,
            RetryConfig::builder().max_retries(0).build().unwrap(),
        );
        AuthenticatedClient::new(
            Arc::new(transport),
            SigningContext::AkSk(Arc::new(SecurityKeyCache::fixed(Credentials::new("AK", "SK")))),
            "https://iam.r1.example.com/v3",
            ClientScope::Project,
            "r1",
        )
    }

    #[tokio::test]
    async fn test_miss_lists_and_caches_every_project() {
        let fake = ScriptedTransport::new([Step::json(
            200,
            &json!({ "projects": [
                { "id": "p-1", "name": "r1" },
                { "id": "p-2", "name": "r2" }
            ]}),
        )]);
        let cache = ProjectIdCache::new();

        assert_eq!(cache.get_or_load("r1", &client(&fake)).await.unwrap(), "p-1");
        assert_eq!(cache.get_or_load("r2", &client(&fake)).await.unwrap(), "p-2");
        assert_eq!(cache.lookups(), 1);
        assert_eq!(fake.calls(), 1);
        assert_eq!(fake.requests()[0].url.query(), Some("name=r1"));
    }

    #[tokio::test]
    async fn test_seeded_region_is_not_listed() {
        let fake = ScriptedTransport::always_refused();
        let cache = ProjectIdCache::seeded("r1", "p-1");

        assert_eq!(cache.get_or_load("r1", &client(&fake)).await.unwrap(), "p-1");
        assert_eq!(fake.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_answer_is_project_not_found() {
        let fake = ScriptedTransport::new([Step::json(200, &json!({ "projects": [] }))]);
        let cache = ProjectIdCache::new();

        let err = cache.get_or_load("r9", &client(&fake)).await.unwrap_err();
        assert!(matches!(err, ClientError::ProjectNotFound { ref region } if region == "r9"));
        assert!(cache.cached("r9").await.is_none());
    }

    #[tokio::test]
    async fn test_list_failure_is_wrapped_with_region() {
        let fake = ScriptedTransport::new([Step::json(403, &json!({ "error": "denied" }))]);
        let cache = ProjectIdCache::new();

        let err = cache.get_or_load("r1", &client(&fake)).await.unwrap_err();
        match err {
            ClientError::ProjectLookup { region, source } => {
                assert_eq!(region, "r1");
                assert_eq!(source.status(), Some(403));
            },
            other => panic!("expected ProjectLookup, got {other:?}"),
        }
    }
}
