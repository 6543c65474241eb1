//! Integration tests for credential resolution against a mock identity
//! service.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use hwcloud_credentials::{
    AssumeRole, AuthError, AuthMode, CredentialOrigin, CredentialResolver, MetadataSource, ProviderConfig,
    SecurityKeyCache,
    testutil::{
        CountingSource, METADATA_PATH, TEST_DOMAIN_ID, aksk_config, mount_identity,
        mount_metadata,
    },
};
use serde_json::json;
use tokio::task::JoinSet;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

// ============================================================================
// Test Helpers
// ============================================================================

const REGION: &str = "cn-north-4";

async fn identity_server() -> MockServer {
    let server = MockServer::start().await;
    mount_identity(&server, &[("p-north", REGION), ("p-east", "cn-east-3")]).await;
    server
}

async fn authorizations(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter_map(|r| r.headers.get("authorization"))
        .map(|v| v.to_str().unwrap().to_owned())
        .collect()
}

// ============================================================================
// Mode resolution
// ============================================================================

#[tokio::test]
async fn aksk_resolution_validates_both_clients() {
    let server = identity_server().await;

    let resolved = CredentialResolver::new().resolve(aksk_config(&server, REGION)).await.unwrap();

    assert_eq!(resolved.mode(), AuthMode::AkSk);
    assert_eq!(resolved.project_id(), Some("p-north"));
    assert_eq!(resolved.domain_id(), Some(TEST_DOMAIN_ID));
    assert_eq!(resolved.project_client().region(), REGION);

    let auth = authorizations(&server).await;
    assert_eq!(auth.len(), 2);
    assert!(auth.iter().all(|a| a.starts_with("SDK-HMAC-SHA256 Access=TESTAK")));
}

#[tokio::test]
async fn shared_file_uses_current_profile() {
    let server = identity_server().await;
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("config.json");
    std::fs::write(
        &file,
        json!({
            "current": "b",
            "profiles": [
                { "name": "a", "mode": "AKSK", "accessKeyId": "AK1", "secretAccessKey": "SK1" },
                { "name": "b", "mode": "AKSK", "accessKeyId": "AK2", "secretAccessKey": "SK2" }
            ]
        })
        .to_string(),
    )
    .unwrap();

    let config = ProviderConfig::builder()
        .region(REGION)
        .shared_config_file(file.to_str().unwrap())
        .identity_endpoint(format!("{}/v3", server.uri()))
        .max_retries(0)
        .build()
        .unwrap();

    let resolved = CredentialResolver::new().resolve(config).await.unwrap();

    assert_eq!(resolved.mode(), AuthMode::SharedFile);
    assert_eq!(resolved.keys().unwrap().current().access_key(), "AK2");
    assert!(authorizations(&server).await.iter().all(|a| a.contains("Access=AK2")));
}

#[tokio::test]
async fn shared_file_supplies_missing_region() {
    let server = identity_server().await;
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("config.json");
    std::fs::write(
        &file,
        json!({
            "current": "east",
            "profiles": [{ "name": "east", "mode": "AKSK", "accessKeyId": "AK",
                           "secretAccessKey": "SK", "region": "cn-east-3" }]
        })
        .to_string(),
    )
    .unwrap();

    let config = ProviderConfig::builder()
        .shared_config_file(file.to_str().unwrap())
        .identity_endpoint(format!("{}/v3", server.uri()))
        .max_retries(0)
        .build()
        .unwrap();

    let resolved = CredentialResolver::new().resolve(config).await.unwrap();
    assert_eq!(resolved.config().provider_region(), "cn-east-3");
    assert_eq!(resolved.project_id(), Some("p-east"));
}

#[tokio::test]
async fn metadata_mode_installs_refreshable_keys() {
    let server = identity_server().await;
    mount_metadata(&server, "META", Utc::now() + Duration::hours(1)).await;

    let config = ProviderConfig::builder()
        .region(REGION)
        .identity_endpoint(format!("{}/v3", server.uri()))
        .metadata_endpoint(format!("{}{METADATA_PATH}", server.uri()))
        .max_retries(0)
        .build()
        .unwrap();

    let resolved = CredentialResolver::new().resolve(config).await.unwrap();

    assert_eq!(resolved.mode(), AuthMode::Metadata);
    let keys = resolved.keys().unwrap();
    assert!(keys.is_refreshable());
    assert!(keys.is_temporary());
    assert_eq!(keys.current().access_key(), "META");
    assert_eq!(keys.current().origin(), CredentialOrigin::Metadata);

    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().any(|r| r.url.path() == "/v3/auth/projects"));
    assert!(
        requests
            .iter()
            .filter(|r| r.url.path().starts_with("/v3/"))
            .all(|r| r.headers.get("x-security-token").is_some())
    );
}

#[tokio::test]
async fn assume_role_rebuilds_clients_with_agency_keys() {
    let server = identity_server().await;
    Mock::given(method("POST"))
        .and(path("/v3.0/OS-CREDENTIAL/securitytokens"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "credential": {
            "access": "AGENCYAK",
            "secret": "AGENCYSK",
            "securitytoken": "AGENCYTOKEN",
            "expires_at": (Utc::now() + Duration::hours(24)).to_rfc3339(),
        }})))
        .expect(1)
        .mount(&server)
        .await;

    let config = ProviderConfig::builder()
        .region(REGION)
        .access_key("TESTAK")
        .secret_key("TESTSK")
        .identity_endpoint(format!("{}/v3", server.uri()))
        .assume_role_agency("ops")
        .assume_role_domain("partner")
        .max_retries(0)
        .build()
        .unwrap();

    let resolved = CredentialResolver::new().resolve(config).await.unwrap();

    let keys = resolved.keys().unwrap();
    assert_eq!(keys.current().access_key(), "AGENCYAK");
    assert_eq!(keys.current().origin(), CredentialOrigin::Agency);
    assert!(keys.is_refreshable());

    let auth = authorizations(&server).await;
    assert!(auth.first().unwrap().contains("Access=TESTAK"));
    assert!(auth.last().unwrap().contains("Access=AGENCYAK"));
}

#[tokio::test]
async fn assume_role_chain_signs_each_hop_with_the_previous_keys() {
    let server = identity_server().await;
    let expires_at = (Utc::now() + Duration::hours(1)).to_rfc3339();
    Mock::given(method("POST"))
        .and(path("/v3.0/OS-CREDENTIAL/securitytokens"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "credential": {
            "access": "HOP1AK",
            "secret": "HOP1SK",
            "securitytoken": "HOP1TOKEN",
            "expires_at": expires_at,
        }})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v5/agencies/assume"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "credentials": {
            "access_key_id": "HOP2AK",
            "secret_access_key": "HOP2SK",
            "security_token": "HOP2TOKEN",
            "expiration": expires_at,
        }})))
        .expect(1)
        .mount(&server)
        .await;

    let config = ProviderConfig::builder()
        .region(REGION)
        .access_key("TESTAK")
        .secret_key("TESTSK")
        .identity_endpoint(format!("{}/v3", server.uri()))
        .endpoints([("sts".to_owned(), server.uri())].into())
        .assume_role_list(vec![
            AssumeRole::builder().agency_name("ops").domain_name("partner").build(),
            AssumeRole::builder().agency_name("deploy").domain_id("d-target").build(),
        ])
        .max_retries(0)
        .build()
        .unwrap();

    let resolved = CredentialResolver::new().resolve(config).await.unwrap();

    assert_eq!(resolved.keys().unwrap().current().access_key(), "HOP2AK");
    assert_eq!(resolved.domain_id(), Some("d-target"));

    let requests = server.received_requests().await.unwrap();
    let signer = |p: &str| {
        let request = requests.iter().find(|r| r.url.path() == p).unwrap();
        request.headers.get("authorization").unwrap().to_str().unwrap().to_owned()
    };
    assert!(signer("/v3.0/OS-CREDENTIAL/securitytokens").contains("Access=TESTAK"));
    assert!(signer("/v5/agencies/assume").contains("Access=HOP1AK"));
    let v5 = requests.iter().find(|r| r.url.path() == "/v5/agencies/assume").unwrap();
    let body: serde_json::Value = serde_json::from_slice(&v5.body).unwrap();
    assert_eq!(body["agency_urn"], "iam::d-target:agency:deploy");
    assert!(authorizations(&server).await.last().unwrap().contains("Access=HOP2AK"));
}

#[tokio::test]
async fn id_token_federation_resolves_against_identity_service() {
    let server = identity_server().await;
    Mock::given(method("POST"))
        .and(path("/v3.0/OS-AUTH/id-token/tokens"))
        .and(header("x-idp-id", "corp-idp"))
        .respond_with(ResponseTemplate::new(201).insert_header("X-Subject-Token", "SUBJECT"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3.0/OS-CREDENTIAL/securitytokens"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "credential": {
            "access": "FEDAK",
            "secret": "FEDSK",
            "securitytoken": "FEDTOKEN",
            "expires_at": (Utc::now() + Duration::minutes(30)).to_rfc3339(),
        }})))
        .expect(1)
        .mount(&server)
        .await;

    let config = ProviderConfig::builder()
        .region(REGION)
        .identity_endpoint(format!("{}/v3", server.uri()))
        .assume_role_idp_id("corp-idp")
        .assume_role_id_token("eyJ.id.token")
        .max_retries(0)
        .build()
        .unwrap();

    let resolved = CredentialResolver::new().resolve(config).await.unwrap();

    assert_eq!(resolved.mode(), AuthMode::Federation);
    assert_eq!(resolved.project_id(), Some("p-north"));
    assert_eq!(resolved.keys().unwrap().current().origin(), CredentialOrigin::Federation);
    assert!(authorizations(&server).await.iter().all(|a| a.contains("Access=FEDAK")));
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn domain_mismatch_names_both_domains() {
    let server = identity_server().await;
    let config = ProviderConfig::builder()
        .region(REGION)
        .access_key("AK")
        .secret_key("SK")
        .domain_name("someone-else")
        .identity_endpoint(format!("{}/v3", server.uri()))
        .max_retries(0)
        .build()
        .unwrap();

    let err = CredentialResolver::new().resolve(config).await.unwrap_err();
    assert!(matches!(err, AuthError::DomainMismatch { .. }));
    assert!(err.to_string().contains("someone-else"));
    assert!(err.to_string().contains("test-domain"));
}

#[tokio::test]
async fn rejected_keys_fail_resolution() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "error": "denied" })))
        .mount(&server)
        .await;

    let err = CredentialResolver::new().resolve(aksk_config(&server, REGION)).await.unwrap_err();
    match err {
        AuthError::Authentication { mode, .. } => assert_eq!(mode, "aksk"),
        other => panic!("expected Authentication, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_profile_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("config.json");
    std::fs::write(&file, json!({ "current": "x", "profiles": [] }).to_string()).unwrap();

    let config = ProviderConfig::builder()
        .region(REGION)
        .shared_config_file(file.to_str().unwrap())
        .build()
        .unwrap();

    let err = CredentialResolver::new().resolve(config).await.unwrap_err();
    assert!(matches!(err, AuthError::ProfileNotFound { .. }));
    assert!(err.is_configuration());
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test]
async fn concurrent_refresh_hits_metadata_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(METADATA_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "credential": {
            "access": "FRESH",
            "secret": "FRESHSK",
            "securitytoken": "FRESHTOKEN",
            "expires_at": (Utc::now() + Duration::hours(1)).to_rfc3339(),
        }})))
        .expect(1)
        .mount(&server)
        .await;

    let source = MetadataSource::new(format!("{}{METADATA_PATH}", server.uri())).unwrap();
    let cache =
        Arc::new(SecurityKeyCache::refreshable(CountingSource::expired(), Arc::new(source)));

    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let cache = Arc::clone(&cache);
        tasks.spawn(async move { cache.refresh_if_needed().await.unwrap().access_key().to_owned() });
    }
    while let Some(access_key) = tasks.join_next().await {
        assert_eq!(access_key.unwrap(), "FRESH");
    }
    assert_eq!(cache.refresh_count(), 1);
}

#[tokio::test]
async fn fresh_keys_are_not_refetched() {
    let source = CountingSource::new(Duration::hours(1));
    let cache = SecurityKeyCache::refreshable(CountingSource::expired(), source.clone());

    cache.refresh_if_needed().await.unwrap();
    cache.refresh_if_needed().await.unwrap();

    assert_eq!(source.fetches(), 1);
    assert_eq!(cache.current().access_key(), "AK1");
}
