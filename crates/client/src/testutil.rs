//! Shared test utilities for service client testing.
//!
//! Builds factories against a [`wiremock::MockServer`] standing in for the
//! identity service. Feature-gated behind `testutil`.
//!
//! ```toml
//! [dev-dependencies]
//! hwcloud-client = { path = "../client", features = ["testutil"] }
//! ```

use hwcloud_credentials::{
    CredentialResolver, ProviderConfig,
    testutil::{aksk_config, mount_identity},
};
use wiremock::MockServer;

use crate::factory::ServiceClientFactory;

/// Provider region used by the helpers.
pub const PROVIDER_REGION: &str = "cn-north-4";

/// Starts an identity mock that knows `projects`, given as `(id, name)`.
pub async fn identity_server(projects: &[(&str, &str)]) -> MockServer {
    let server = MockServer::start().await;
    mount_identity(&server, projects).await;
    server
}

/// Resolves `config` and wraps it in a factory with the built-in catalog.
///
/// # Panics
///
/// Panics if resolution fails.
pub async fn factory(config: ProviderConfig) -> ServiceClientFactory {
    let credentials = CredentialResolver::new()
        .resolve(config)
        .await
        .expect("credentials should resolve against the mock");
    ServiceClientFactory::builder().credentials(credentials).build()
}

/// AK/SK factory for [`PROVIDER_REGION`] against `server`.
///
/// # Panics
///
/// Panics if resolution fails.
pub async fn aksk_factory(server: &MockServer) -> ServiceClientFactory {
    factory(aksk_config(server, PROVIDER_REGION)).await
}

/// Counts project list calls filtered by `region`'s name.
pub async fn project_queries(server: &MockServer, region: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/v3/projects")
        .filter(|r| r.url.query_pairs().any(|(k, v)| k == "name" && v == region))
        .count()
}
