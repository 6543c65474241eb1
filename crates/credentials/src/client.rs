//! Authenticated clients.
//!
//! An [`AuthenticatedClient`] pairs the shared [`RetryingTransport`] with a
//! signing context and the identity it was validated for. Resolution
//! produces two: one scoped to a project and one scoped to the account
//! domain. Service clients are shallow clones with the project ID and
//! region replaced; every clone shares the transport and the key cache.

use std::{fmt, sync::Arc};

use http::{HeaderValue, Method};
use hwcloud_transport::{
    AkSkSigner, HttpResponse, RequestSigner, RetryingTransport, TokenSigner, TransportError,
};
use reqwest::Request;
use serde::{Serialize, de::DeserializeOwned};

use crate::{credentials::Credentials, error::Result, security_key_cache::SecurityKeyCache};

/// What an authenticated client's identity is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientScope {
    /// A single project in one region.
    Project,
    /// The whole account domain; used for global and admin services.
    Domain,
}

/// How requests are signed.
#[derive(Clone)]
pub enum SigningContext {
    /// `X-Auth-Token` with an IAM token.
    Token(TokenSigner),
    /// `SDK-HMAC-SHA256` with the current keys from the cache.
    AkSk(Arc<SecurityKeyCache>),
}

impl fmt::Debug for SigningContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(signer) => f.debug_tuple("Token").field(signer).finish(),
            Self::AkSk(keys) => f.debug_tuple("AkSk").field(&keys.current().access_key()).finish(),
        }
    }
}

/// A transport plus signing context plus identity.
#[derive(Clone)]
pub struct AuthenticatedClient {
    transport: Arc<RetryingTransport>,
    signing: SigningContext,
    identity_endpoint: String,
    scope: ClientScope,
    region: String,
    project_id: Option<String>,
    domain_id: Option<String>,
}

impl fmt::Debug for AuthenticatedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedClient")
            .field("signing", &self.signing)
            .field("identity_endpoint", &self.identity_endpoint)
            .field("scope", &self.scope)
            .field("region", &self.region)
            .field("project_id", &self.project_id)
            .field("domain_id", &self.domain_id)
            .finish_non_exhaustive()
    }
}

impl AuthenticatedClient {
    /// Creates a client. Resolution normally does this; tests and custom
    /// flows may call it directly.
    pub fn new(
        transport: Arc<RetryingTransport>,
        signing: SigningContext,
        identity_endpoint: impl Into<String>,
        scope: ClientScope,
        region: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            signing,
            identity_endpoint: identity_endpoint.into(),
            scope,
            region: region.into(),
            project_id: None,
            domain_id: None,
        }
    }

    /// Returns a clone with a different project ID and region.
    ///
    /// The clone shares the transport and credentials.
    #[must_use]
    pub fn with_project(&self, project_id: impl Into<String>, region: impl Into<String>) -> Self {
        let mut clone = self.clone();
        clone.project_id = Some(project_id.into()).filter(|id: &String| !id.is_empty());
        clone.region = region.into();
        clone
    }

    #[must_use]
    pub(crate) fn with_domain_id(mut self, domain_id: Option<String>) -> Self {
        self.domain_id = domain_id.filter(|id| !id.is_empty());
        self
    }

    /// Returns a domain-scoped clone signing with `keys` and carrying no
    /// project or domain identifiers. Used to sign the next hop of an
    /// agency chain.
    #[must_use]
    pub(crate) fn signed_by(&self, keys: Arc<SecurityKeyCache>) -> Self {
        Self {
            signing: SigningContext::AkSk(keys),
            scope: ClientScope::Domain,
            project_id: None,
            domain_id: None,
            ..self.clone()
        }
    }

    /// Returns the identity service endpoint, without a trailing slash.
    #[must_use]
    pub fn identity_endpoint(&self) -> &str {
        &self.identity_endpoint
    }

    /// Returns the scope.
    #[must_use]
    pub fn scope(&self) -> ClientScope {
        self.scope
    }

    /// Returns the region.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Returns the project ID, if project-scoped and known.
    #[must_use]
    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    /// Returns the account domain ID, if known.
    #[must_use]
    pub fn domain_id(&self) -> Option<&str> {
        self.domain_id.as_deref()
    }

    /// Returns the signing context.
    #[must_use]
    pub fn signing(&self) -> &SigningContext {
        &self.signing
    }

    /// Returns `true` if requests are signed with AK/SK.
    #[must_use]
    pub fn is_aksk(&self) -> bool {
        matches!(self.signing, SigningContext::AkSk(_))
    }

    /// Returns the key cache of an AK/SK client.
    #[must_use]
    pub fn keys(&self) -> Option<&Arc<SecurityKeyCache>> {
        match &self.signing {
            SigningContext::AkSk(keys) => Some(keys),
            SigningContext::Token(_) => None,
        }
    }

    /// Refreshes temporary credentials if they are near expiry.
    ///
    /// A no-op for token clients and long-lived keys.
    ///
    /// # Errors
    ///
    /// Propagates the refresh failure.
    pub async fn refresh_credentials(&self) -> Result<()> {
        if let SigningContext::AkSk(keys) = &self.signing {
            keys.refresh_if_needed().await?;
        }
        Ok(())
    }

    /// Builds the signer for one request.
    fn signer(&self) -> Box<dyn RequestSigner> {
        match &self.signing {
            SigningContext::Token(signer) => Box::new(signer.clone()),
            SigningContext::AkSk(keys) => Box::new(self.aksk_signer(&keys.current())),
        }
    }

    fn aksk_signer(&self, credentials: &Credentials) -> AkSkSigner {
        let (project_id, domain_id) = match self.scope {
            ClientScope::Project => (self.project_id.clone(), None),
            ClientScope::Domain => (None, self.domain_id.clone()),
        };
        AkSkSigner::builder()
            .access_key(credentials.access_key())
            .secret_key(credentials.secret_key())
            .maybe_security_token(credentials.security_token())
            .maybe_project_id(project_id)
            .maybe_domain_id(domain_id)
            .build()
    }

    /// Signs and sends `request`, returning the response whatever its status.
    ///
    /// Redirects are re-signed only under AK/SK signing.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] on signing or connection failure.
    pub async fn execute(&self, mut request: Request) -> Result<HttpResponse, TransportError> {
        let signer = self.signer();
        signer.sign(&mut request)?;
        let resign = self.is_aksk().then_some(signer.as_ref());
        self.transport.send(request, resign).await
    }

    /// Sends a request with an optional JSON body and fails on non-2xx
    /// answers.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Status`] (or `Throttled`) for non-2xx
    /// answers, or any transport failure.
    pub async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<HttpResponse, TransportError> {
        let url = url::Url::parse(url).map_err(|e| {
            TransportError::invalid_request_with_source(format!("invalid URL {url:?}"), e)
        })?;
        let mut request = Request::new(method, url);
        if let Some(body) = body {
            let bytes = serde_json::to_vec(body).map_err(|e| {
                TransportError::invalid_request_with_source("cannot encode request body", e)
            })?;
            request
                .headers_mut()
                .insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            *request.body_mut() = Some(bytes.into());
        }
        self.execute(request).await?.error_for_status()
    }

    /// `GET url` and decode the JSON answer.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request); also [`TransportError::Decode`].
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, TransportError> {
        self.request::<()>(Method::GET, url, None).await?.json()
    }

    /// `POST url` with a JSON body and decode the JSON answer.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request); also [`TransportError::Decode`].
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, TransportError> {
        self.request(Method::POST, url, Some(body)).await?.json()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use hwcloud_transport::{
        RoundTrip,
        testutil::{ScriptedTransport, Step},
    };
    use serde_json::json;

    use super::*;

    fn client(fake: &Arc<ScriptedTransport>, signing: SigningContext, scope: ClientScope) -> AuthenticatedClient {
        let transport = RetryingTransport::new(
            Arc::clone(fake) as Arc<dyn RoundTrip>,
            hwcloud_transport::RetryConfig::default(),
        );
        AuthenticatedClient::new(
            Arc::new(transport),
            signing,
            "https://iam.r1.example.com/v3",
            scope,
            "r1",
        )
    }

    fn aksk() -> SigningContext {
        SigningContext::AkSk(Arc::new(SecurityKeyCache::fixed(
            Credentials::new("AK", "SK").with_security_token("STS"),
        )))
    }

    #[tokio::test]
    async fn test_project_client_signs_with_project_header() {
        let fake = ScriptedTransport::new([Step::json(200, &json!({}))]);
        let client = client(&fake, aksk(), ClientScope::Project).with_project("p-1", "r1");

        client.get_json::<serde_json::Value>("https://ecs.r1.example.com/v1/p-1/servers").await.unwrap();

        let sent = &fake.requests()[0];
        assert_eq!(sent.headers.get("x-project-id").unwrap(), "p-1");
        assert_eq!(sent.headers.get("x-security-token").unwrap(), "STS");
        assert!(sent.headers.get("x-domain-id").is_none());
        assert!(
            sent.headers
                .get("authorization")
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("SDK-HMAC-SHA256 Access=AK")
        );
    }

    #[tokio::test]
    async fn test_domain_client_signs_with_domain_header() {
        let fake = ScriptedTransport::new([Step::json(200, &json!({}))]);
        let client = client(&fake, aksk(), ClientScope::Domain).with_domain_id(Some("d-1".into()));

        client.get_json::<serde_json::Value>("https://iam.example.com/v3/auth/domains").await.unwrap();

        let sent = &fake.requests()[0];
        assert_eq!(sent.headers.get("x-domain-id").unwrap(), "d-1");
        assert!(sent.headers.get("x-project-id").is_none());
    }

    #[tokio::test]
    async fn test_token_client_sets_auth_token() {
        let fake = ScriptedTransport::new([Step::json(201, &json!({ "ok": true }))]);
        let client =
            client(&fake, SigningContext::Token(TokenSigner::new("tok")), ClientScope::Project);

        let body = json!({ "name": "x" });
        let value: serde_json::Value =
            client.post_json("https://vpc.r1.example.com/v1/p/vpcs", &body).await.unwrap();

        assert_eq!(value["ok"], true);
        let sent = &fake.requests()[0];
        assert_eq!(sent.headers.get("x-auth-token").unwrap(), "tok");
        assert_eq!(sent.headers.get("content-type").unwrap(), "application/json");
        assert!(!client.is_aksk());
    }

    #[tokio::test]
    async fn test_non_success_is_an_error() {
        let fake = ScriptedTransport::new([Step::json(404, &json!({ "error": "missing" }))]);
        let client = client(&fake, aksk(), ClientScope::Project);

        let err = client.get_json::<serde_json::Value>("https://x.example.com/").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn test_signed_by_swaps_keys_and_drops_identifiers() {
        let fake = ScriptedTransport::always_refused();
        let base = client(&fake, aksk(), ClientScope::Project)
            .with_project("p-1", "r1")
            .with_domain_id(Some("d-1".into()));
        let hop = Arc::new(SecurityKeyCache::fixed(Credentials::new("HOP", "HOPSK")));

        let next = base.signed_by(Arc::clone(&hop));

        assert!(Arc::ptr_eq(next.keys().unwrap(), &hop));
        assert_eq!(next.scope(), ClientScope::Domain);
        assert_eq!(next.project_id(), None);
        assert_eq!(next.domain_id(), None);
        assert_eq!(next.identity_endpoint(), base.identity_endpoint());
    }

    #[test]
    fn test_with_project_shares_keys() {
        let fake = ScriptedTransport::always_refused();
        let base = client(&fake, aksk(), ClientScope::Project);
        let clone = base.with_project("p-2", "r2");

        assert_eq!(clone.project_id(), Some("p-2"));
        assert_eq!(clone.region(), "r2");
        assert_eq!(base.project_id(), None);
        assert!(Arc::ptr_eq(base.keys().unwrap(), clone.keys().unwrap()));
    }
}
