//! Shared test utilities for credential testing.
//!
//! Mounts identity and metadata responses on a [`wiremock::MockServer`] and
//! provides a counting [`CredentialSource`]. Feature-gated behind `testutil`
//! so fakes never reach production builds.
//!
//! ```toml
//! [dev-dependencies]
//! hwcloud-credentials = { path = "../credentials", features = ["testutil"] }
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

use crate::{
    config::ProviderConfig,
    credentials::{CredentialOrigin, Credentials},
    error::Result,
    security_key_cache::CredentialSource,
};

/// Domain ID answered by [`mount_identity`].
pub const TEST_DOMAIN_ID: &str = "d-test";

/// Domain name answered by [`mount_identity`].
pub const TEST_DOMAIN_NAME: &str = "test-domain";

/// Path of the metadata endpoint mounted by [`mount_metadata`].
pub const METADATA_PATH: &str = "/openstack/latest/securitykey";

/// Mounts `GET /v3/auth/domains`, `GET /v3/projects` and
/// `GET /v3/auth/projects` on `server`.
///
/// `projects` is a list of `(id, name)` pairs; a project query filtered by
/// name gets every project, leaving the filtering to the caller.
pub async fn mount_identity(server: &MockServer, projects: &[(&str, &str)]) {
    Mock::given(method("GET"))
        .and(path("/v3/auth/domains"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "domains": [{ "id": TEST_DOMAIN_ID, "name": TEST_DOMAIN_NAME }]
        })))
        .mount(server)
        .await;

    let projects: Vec<_> = projects
        .iter()
        .map(|(id, name)| json!({ "id": id, "name": name, "domain_id": TEST_DOMAIN_ID }))
        .collect();
    for catalog in ["/v3/projects", "/v3/auth/projects"] {
        Mock::given(method("GET"))
            .and(path(catalog))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "projects": projects })))
            .mount(server)
            .await;
    }
}

/// Mounts the instance metadata endpoint answering keys that expire at
/// `expires_at`.
pub async fn mount_metadata(server: &MockServer, access_key: &str, expires_at: DateTime<Utc>) {
    Mock::given(method("GET"))
        .and(path(METADATA_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "credential": {
            "access": access_key,
            "secret": format!("{access_key}-secret"),
            "securitytoken": format!("{access_key}-token"),
            "expires_at": expires_at.to_rfc3339(),
        }})))
        .mount(server)
        .await;
}

/// AK/SK configuration pointed at `server`'s identity endpoint.
///
/// # Panics
///
/// Panics if the configuration is invalid (it never is).
pub fn aksk_config(server: &MockServer, region: &str) -> ProviderConfig {
    ProviderConfig::builder()
        .region(region)
        .access_key("TESTAK")
        .secret_key("TESTSK")
        .identity_endpoint(format!("{}/v3", server.uri()))
        .max_retries(0)
        .build()
        .expect("valid test configuration")
}

/// A [`CredentialSource`] that counts fetches and issues keys expiring
/// `lifetime` after each fetch.
#[derive(Debug)]
pub struct CountingSource {
    fetches: AtomicUsize,
    lifetime: Duration,
}

impl CountingSource {
    /// Creates a source issuing keys valid for `lifetime`.
    pub fn new(lifetime: Duration) -> Arc<Self> {
        Arc::new(Self { fetches: AtomicUsize::new(0), lifetime })
    }

    /// Number of fetches so far.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Credentials that expired a minute ago.
    pub fn expired() -> Credentials {
        Credentials::new("OLDAK", "OLDSK")
            .with_security_token("OLDTOKEN")
            .with_expiry(Utc::now() - Duration::minutes(1))
            .with_origin(CredentialOrigin::Metadata)
    }
}

#[async_trait]
impl CredentialSource for CountingSource {
    async fn fetch(&self) -> Result<Credentials> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::task::yield_now().await;
        Ok(Credentials::new(format!("AK{n}"), format!("SK{n}"))
            .with_security_token(format!("TOKEN{n}"))
            .with_expiry(Utc::now() + self.lifetime)
            .with_origin(CredentialOrigin::Metadata))
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}
