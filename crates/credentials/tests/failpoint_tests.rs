#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection in the credentials crate.
//!
//! These tests require both `failpoints` and `testutil` features:
//! ```bash
//! cargo test -p hwcloud-credentials --features failpoints,testutil --test failpoint_tests
//! ```

#![cfg(feature = "failpoints")]

use chrono::Duration;
use hwcloud_credentials::{AuthError, SecurityKeyCache, testutil::CountingSource};

#[tokio::test]
async fn failed_refresh_keeps_previous_keys() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("security-key-before-refresh", "return").expect("failed to configure fail point");

    let source = CountingSource::new(Duration::hours(1));
    let cache = SecurityKeyCache::refreshable(CountingSource::expired(), source.clone());

    match cache.refresh_if_needed().await {
        Err(AuthError::Metadata { message, .. }) => assert!(message.contains("injected")),
        other => panic!("expected injected Metadata error, got {other:?}"),
    }
    assert_eq!(cache.current().access_key(), "OLDAK");
    assert_eq!(source.fetches(), 0);
    assert_eq!(cache.refresh_count(), 0);

    scenario.teardown();
}

#[tokio::test]
async fn refresh_succeeds_once_point_turns_off() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("security-key-before-refresh", "1*return->off").expect("failed to configure fail point");

    let source = CountingSource::new(Duration::hours(1));
    let cache = SecurityKeyCache::refreshable(CountingSource::expired(), source.clone());

    assert!(cache.refresh_if_needed().await.is_err());
    let fresh = cache.refresh_if_needed().await.expect("second refresh should succeed");

    assert_eq!(fresh.access_key(), "AK1");
    assert_eq!(source.fetches(), 1);

    scenario.teardown();
}
