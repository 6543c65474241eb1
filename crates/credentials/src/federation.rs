//! Identity-provider federation.
//!
//! An OpenID Connect ID token issued by a registered identity provider is
//! traded for temporary keys in two steps:
//!
//! ```text
//! POST {identity root}/v3.0/OS-AUTH/id-token/tokens      X-Idp-Id: {idp}
//! {"auth": {"id_token": {"id": "..."}}}
//! → 201, X-Subject-Token: {subject token}
//!
//! POST {identity root}/v3.0/OS-CREDENTIAL/securitytokens
//! {"auth": {"identity": {"methods": ["token"], "token": {"id": "{subject token}"}}}}
//! → {"credential": {"access", "secret", "securitytoken", "expires_at"}}
//! ```
//!
//! Neither call is signed. The ID token is kept, so the keys can be
//! refreshed for as long as the identity provider's token stays valid.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use hwcloud_transport::RetryingTransport;
use serde_json::json;

use crate::{
    assume_role::{SecurityTokenResponse, identity_root, security_token_endpoint},
    credentials::{CredentialOrigin, Credentials, Secret},
    error::{AuthError, Result},
    identity::{HEADER_SUBJECT_TOKEN, post_unsigned},
    security_key_cache::CredentialSource,
};

/// Header naming the identity provider.
pub const HEADER_IDP_ID: &str = "x-idp-id";

/// Lifetime assumed for federated keys whose answer names no expiry.
pub const FEDERATION_DURATION: Duration = Duration::from_secs(15 * 60);

/// Fetches temporary keys for an identity-provider ID token.
pub struct FederationSource {
    transport: Arc<RetryingTransport>,
    identity_endpoint: String,
    idp_id: String,
    id_token: Secret,
}

impl std::fmt::Debug for FederationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationSource")
            .field("identity_endpoint", &self.identity_endpoint)
            .field("idp_id", &self.idp_id)
            .finish_non_exhaustive()
    }
}

impl FederationSource {
    /// Creates a source for `id_token` issued by `idp_id`.
    pub fn new(
        transport: Arc<RetryingTransport>,
        identity_endpoint: impl Into<String>,
        idp_id: impl Into<String>,
        id_token: Secret,
    ) -> Self {
        Self {
            transport,
            identity_endpoint: identity_endpoint.into(),
            idp_id: idp_id.into(),
            id_token,
        }
    }

    /// Returns the URL of the ID-token exchange.
    #[must_use]
    pub fn id_token_endpoint(&self) -> String {
        format!("{}/v3.0/OS-AUTH/id-token/tokens", identity_root(&self.identity_endpoint))
    }

    async fn subject_token(&self) -> Result<String> {
        let body = json!({ "auth": { "id_token": { "id": self.id_token.expose() } } });
        let response = post_unsigned(
            &self.transport,
            &self.id_token_endpoint(),
            &body,
            None,
            &[(HEADER_IDP_ID, self.idp_id.as_str())],
        )
        .await?;
        response
            .header(HEADER_SUBJECT_TOKEN)
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| AuthError::Upstream("ID token response carries no X-Subject-Token".into()))
    }

    async fn security_token(&self, subject_token: &str) -> Result<Credentials> {
        let body = json!({ "auth": { "identity": {
            "methods": ["token"],
            "token": { "id": subject_token },
        }}});
        let url = security_token_endpoint(&self.identity_endpoint);
        let response: SecurityTokenResponse =
            post_unsigned(&self.transport, &url, &body, None, &[]).await?.json()?;
        response.credential.into_credentials(CredentialOrigin::Federation, FEDERATION_DURATION)
    }
}

#[async_trait]
impl CredentialSource for FederationSource {
    #[tracing::instrument(skip(self), fields(idp = %self.idp_id))]
    async fn fetch(&self) -> Result<Credentials> {
        let wrap = |source: AuthError| AuthError::Federation {
            idp: self.idp_id.clone(),
            source: Arc::new(source),
        };

        let subject_token = self.subject_token().await.map_err(wrap)?;
        let credentials = self.security_token(&subject_token).await.map_err(wrap)?;

        tracing::info!(
            idp = %self.idp_id,
            access_key = %credentials.access_key(),
            expires_at = ?credentials.expires_at(),
            "federated credentials issued"
        );
        Ok(credentials)
    }

    fn name(&self) -> &'static str {
        "federation"
    }
}
