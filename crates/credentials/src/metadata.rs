//! Instance metadata credentials.
//!
//! Cloud servers with an attached agency can read temporary keys from the
//! link-local metadata service:
//!
//! ```text
//! GET http://169.254.169.254/openstack/latest/securitykey
//! → {"credential": {"access": "...", "secret": "...",
//!                   "securitytoken": "...", "expires_at": "RFC3339"}}
//! ```
//!
//! The call goes straight to the base transport: no connection retries and
//! no proxy, so a host without a metadata service fails fast.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::Method;
use hwcloud_transport::{HttpTransport, RoundTrip, TransportConfig};
use reqwest::Request;
use serde::Deserialize;

use crate::{
    credentials::{CredentialOrigin, Credentials},
    error::{AuthError, Result},
    security_key_cache::CredentialSource,
};

/// Timeout for one metadata request.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct SecurityKeyResponse {
    credential: Option<SecurityKeyBody>,
}

#[derive(Debug, Default, Deserialize)]
struct SecurityKeyBody {
    #[serde(default)]
    access: String,
    #[serde(default)]
    secret: String,
    #[serde(default)]
    securitytoken: String,
    #[serde(default)]
    expires_at: String,
}

/// Fetches temporary keys from the instance metadata service.
pub struct MetadataSource {
    transport: Arc<dyn RoundTrip>,
    endpoint: String,
}

impl std::fmt::Debug for MetadataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataSource").field("endpoint", &self.endpoint).finish_non_exhaustive()
    }
}

impl MetadataSource {
    /// Creates a source reading `endpoint` through its own plain HTTP
    /// client.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let config = TransportConfig::builder().timeout(METADATA_TIMEOUT).build();
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(Arc::new(transport), endpoint))
    }

    /// Creates a source reading `endpoint` through `transport`.
    pub fn with_transport(transport: Arc<dyn RoundTrip>, endpoint: impl Into<String>) -> Self {
        Self { transport, endpoint: endpoint.into() }
    }

    /// Returns the endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CredentialSource for MetadataSource {
    #[tracing::instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn fetch(&self) -> Result<Credentials> {
        let url = url::Url::parse(&self.endpoint).map_err(|e| {
            AuthError::metadata_with_source(format!("invalid metadata endpoint {}", self.endpoint), e)
        })?;
        let response = self
            .transport
            .round_trip(Request::new(Method::GET, url))
            .await
            .map_err(|e| AuthError::metadata_with_source("error requesting metadata API", e))?;

        if response.status != http::StatusCode::OK {
            return Err(AuthError::metadata(format!(
                "error requesting metadata API: status code = {}",
                response.status.as_u16()
            )));
        }

        let parsed: SecurityKeyResponse = response
            .json()
            .map_err(|e| AuthError::metadata_with_source("error parsing metadata API response", e))?;
        let body = parsed.credential.unwrap_or_default();
        if body.access.is_empty()
            || body.secret.is_empty()
            || body.securitytoken.is_empty()
            || body.expires_at.is_empty()
        {
            return Err(AuthError::metadata("incomplete credential in metadata API response"));
        }

        let expires_at = DateTime::parse_from_rfc3339(&body.expires_at)
            .map_err(|e| AuthError::metadata_with_source("invalid expires_at in metadata API response", e))?
            .with_timezone(&Utc);

        tracing::debug!(access_key = %body.access, %expires_at, "fetched metadata security key");
        Ok(Credentials::new(body.access, body.secret)
            .with_security_token(body.securitytoken)
            .with_expiry(expires_at)
            .with_origin(CredentialOrigin::Metadata))
    }

    fn name(&self) -> &'static str {
        "metadata"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use hwcloud_transport::testutil::{ScriptedTransport, Step};
    use serde_json::json;

    use super::*;

    const ENDPOINT: &str = "http://169.254.169.254/openstack/latest/securitykey";

    fn source(steps: impl IntoIterator<Item = Step>) -> MetadataSource {
        MetadataSource::with_transport(ScriptedTransport::new(steps), ENDPOINT)
    }

    #[tokio::test]
    async fn test_parses_credential() {
        let source = source([Step::json(
            200,
            &json!({ "credential": {
                "access": "TMPAK",
                "secret": "TMPSK",
                "securitytoken": "TOKEN",
                "expires_at": "2030-01-02T03:04:05.000000Z",
            }}),
        )]);

        let creds = source.fetch().await.unwrap();
        assert_eq!(creds.access_key(), "TMPAK");
        assert_eq!(creds.secret_key(), "TMPSK");
        assert_eq!(creds.security_token(), Some("TOKEN"));
        assert_eq!(creds.origin(), CredentialOrigin::Metadata);
        assert_eq!(creds.expires_at().unwrap().to_rfc3339(), "2030-01-02T03:04:05+00:00");
    }

    #[tokio::test]
    async fn test_missing_field_is_an_error() {
        let source = source([Step::json(
            200,
            &json!({ "credential": { "access": "A", "secret": "S", "expires_at": "2030-01-01T00:00:00Z" } }),
        )]);
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, AuthError::Metadata { .. }));
    }

    #[tokio::test]
    async fn test_non_ok_status_is_an_error() {
        let source = source([Step::json(404, &json!({}))]);
        let err = source.fetch().await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_connection_failure_is_not_retried() {
        let fake = ScriptedTransport::always_refused();
        let source = MetadataSource::with_transport(fake.clone(), ENDPOINT);
        assert!(source.fetch().await.is_err());
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn test_bad_expiry_is_an_error() {
        let source = source([Step::json(
            200,
            &json!({ "credential": {
                "access": "A", "secret": "S", "securitytoken": "T", "expires_at": "tomorrow"
            }}),
        )]);
        assert!(source.fetch().await.is_err());
    }
}
