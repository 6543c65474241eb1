//! Assume-role exchange.
//!
//! Trades base AK/SK for temporary keys of a delegated agency. Two calls
//! exist, picked per agency:
//!
//! ```text
//! by domain name (v3):
//! POST https://iam.{region}.{cloud}/v3.0/OS-CREDENTIAL/securitytokens
//! {"auth": {"identity": {"methods": ["assume_role"],
//!   "assume_role": {"agency_name": "...", "domain_name": "...",
//!                   "duration_seconds": 86400}}}}
//! → {"credential": {"access", "secret", "securitytoken", "expires_at"}}
//!
//! by domain ID (v5):
//! POST https://sts.{region}.{cloud}/v5/agencies/assume
//! {"agency_urn": "iam::{domain_id}:agency:{agency}",
//!  "agency_session_name": "...", "duration_seconds": 3600}
//! → {"credentials": {"access_key_id", "secret_access_key",
//!                    "security_token", "expiration"}}
//! ```
//!
//! Agencies can be chained: each exchange is signed with the keys the
//! previous one returned, and refreshing the last keys refreshes the whole
//! chain on demand.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    client::AuthenticatedClient,
    config::AssumeRole,
    credentials::{CredentialOrigin, Credentials},
    error::{AuthError, Result},
    security_key_cache::{CredentialSource, SecurityKeyCache},
};

/// Lifetime requested for agency credentials (24 hours).
pub const ASSUME_ROLE_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Lifetime assumed for v5 agency credentials when neither the request nor
/// the answer names one.
pub const DEFAULT_V5_DURATION: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Serialize)]
struct AssumeRoleRequest<'a> {
    auth: AssumeRoleAuth<'a>,
}

#[derive(Debug, Serialize)]
struct AssumeRoleAuth<'a> {
    identity: AssumeRoleIdentity<'a>,
}

#[derive(Debug, Serialize)]
struct AssumeRoleIdentity<'a> {
    methods: [&'static str; 1],
    assume_role: AssumeRoleTarget<'a>,
}

#[derive(Debug, Serialize)]
struct AssumeRoleTarget<'a> {
    agency_name: &'a str,
    domain_name: &'a str,
    duration_seconds: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SecurityTokenResponse {
    pub(crate) credential: TemporaryCredential,
}

/// Keys as returned by the `OS-CREDENTIAL/securitytokens` calls.
#[derive(Debug, Deserialize)]
pub(crate) struct TemporaryCredential {
    access: String,
    secret: String,
    securitytoken: String,
    #[serde(default)]
    expires_at: Option<String>,
}

impl TemporaryCredential {
    /// Converts to a snapshot; a missing expiry means `lifetime` from now.
    pub(crate) fn into_credentials(
        self,
        origin: CredentialOrigin,
        lifetime: Duration,
    ) -> Result<Credentials> {
        let expires_at = parse_expiry(self.expires_at.as_deref(), lifetime)?;
        Ok(Credentials::new(self.access, self.secret)
            .with_security_token(self.securitytoken)
            .with_expiry(expires_at)
            .with_origin(origin))
    }
}

#[derive(Debug, Serialize)]
struct AgencyAssumeRequest<'a> {
    agency_urn: String,
    agency_session_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_seconds: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct AgencyAssumeResponse {
    credentials: AssumedCredentials,
}

#[derive(Debug, Deserialize)]
struct AssumedCredentials {
    #[serde(default)]
    access_key_id: String,
    #[serde(default)]
    secret_access_key: String,
    #[serde(default)]
    security_token: String,
    #[serde(default)]
    expiration: Option<String>,
}

fn parse_expiry(raw: Option<&str>, lifetime: Duration) -> Result<DateTime<Utc>> {
    match raw.filter(|s| !s.is_empty()) {
        Some(raw) => Ok(DateTime::parse_from_rfc3339(raw)
            .map_err(|e| AuthError::Upstream(format!("invalid expiry {raw:?}: {e}")))?
            .with_timezone(&Utc)),
        None => {
            let lifetime = chrono::Duration::from_std(lifetime)
                .map_err(|e| AuthError::Upstream(format!("invalid credential lifetime: {e}")))?;
            Ok(Utc::now() + lifetime)
        },
    }
}

/// Issues agency credentials by signing the exchange with a base client.
///
/// The base client keeps its own key cache, so base keys that are
/// themselves temporary are refreshed before each exchange.
#[derive(Debug)]
pub struct AgencySource {
    base: AuthenticatedClient,
    agency_name: String,
    domain_name: String,
}

impl AgencySource {
    /// Creates an exchange for `agency_name` in `domain_name`, signed by
    /// `base`.
    pub fn new(
        base: AuthenticatedClient,
        agency_name: impl Into<String>,
        domain_name: impl Into<String>,
    ) -> Self {
        Self { base, agency_name: agency_name.into(), domain_name: domain_name.into() }
    }

    /// Returns the URL of the security-token endpoint.
    #[must_use]
    pub fn endpoint(&self) -> String {
        security_token_endpoint(self.base.identity_endpoint())
    }
}

/// Returns `{identity root}/v3.0/OS-CREDENTIAL/securitytokens`.
pub(crate) fn security_token_endpoint(identity_endpoint: &str) -> String {
    format!("{}/v3.0/OS-CREDENTIAL/securitytokens", identity_root(identity_endpoint))
}

/// Strips the trailing `/v3` from an identity endpoint.
pub(crate) fn identity_root(identity_endpoint: &str) -> &str {
    let root = identity_endpoint.trim_end_matches('/');
    root.strip_suffix("/v3").unwrap_or(root)
}

#[async_trait]
impl CredentialSource for AgencySource {
    #[tracing::instrument(skip(self), fields(agency = %self.agency_name, domain = %self.domain_name))]
    async fn fetch(&self) -> Result<Credentials> {
        let wrap = |source: AuthError| AuthError::AssumeRole {
            agency: self.agency_name.clone(),
            domain: self.domain_name.clone(),
            source: Arc::new(source),
        };

        self.base.refresh_credentials().await.map_err(wrap)?;

        let body = AssumeRoleRequest {
            auth: AssumeRoleAuth {
                identity: AssumeRoleIdentity {
                    methods: ["assume_role"],
                    assume_role: AssumeRoleTarget {
                        agency_name: &self.agency_name,
                        domain_name: &self.domain_name,
                        duration_seconds: ASSUME_ROLE_DURATION.as_secs(),
                    },
                },
            },
        };

        let response: SecurityTokenResponse = self
            .base
            .post_json(&self.endpoint(), &body)
            .await
            .map_err(|e| wrap(AuthError::Transport(e)))?;
        let credentials = response
            .credential
            .into_credentials(CredentialOrigin::Agency, ASSUME_ROLE_DURATION)
            .map_err(wrap)?;

        tracing::info!(
            agency = %self.agency_name,
            access_key = %credentials.access_key(),
            expires_at = ?credentials.expires_at(),
            "assumed agency role"
        );
        Ok(credentials)
    }

    fn name(&self) -> &'static str {
        "agency"
    }
}

/// Issues agency credentials through the IAM v5 `agencies/assume` call.
#[derive(Debug)]
pub struct AgencyV5Source {
    base: AuthenticatedClient,
    sts_endpoint: String,
    agency_name: String,
    domain_id: String,
    duration_seconds: Option<u32>,
}

impl AgencyV5Source {
    /// Creates an exchange for `agency_name` in the domain `domain_id`,
    /// signed by `base` and sent to `sts_endpoint`.
    pub fn new(
        base: AuthenticatedClient,
        sts_endpoint: impl Into<String>,
        agency_name: impl Into<String>,
        domain_id: impl Into<String>,
        duration_seconds: Option<u32>,
    ) -> Self {
        Self {
            base,
            sts_endpoint: sts_endpoint.into(),
            agency_name: agency_name.into(),
            domain_id: domain_id.into(),
            duration_seconds,
        }
    }

    /// Returns the agency URN, `iam::{domain_id}:agency:{agency}`.
    #[must_use]
    pub fn agency_urn(&self) -> String {
        format!("iam::{}:agency:{}", self.domain_id, self.agency_name)
    }

    /// Returns the URL of the assume call.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}/v5/agencies/assume", self.sts_endpoint.trim_end_matches('/'))
    }

    fn lifetime(&self) -> Duration {
        self.duration_seconds
            .map_or(DEFAULT_V5_DURATION, |seconds| Duration::from_secs(u64::from(seconds)))
    }
}

#[async_trait]
impl CredentialSource for AgencyV5Source {
    #[tracing::instrument(skip(self), fields(agency = %self.agency_name, domain_id = %self.domain_id))]
    async fn fetch(&self) -> Result<Credentials> {
        let wrap = |source: AuthError| AuthError::AssumeRole {
            agency: self.agency_name.clone(),
            domain: self.domain_id.clone(),
            source: Arc::new(source),
        };

        self.base.refresh_credentials().await.map_err(wrap)?;

        let body = AgencyAssumeRequest {
            agency_urn: self.agency_urn(),
            agency_session_name: &self.agency_name,
            duration_seconds: self.duration_seconds,
        };
        let response: AgencyAssumeResponse = self
            .base
            .post_json(&self.endpoint(), &body)
            .await
            .map_err(|e| wrap(AuthError::Transport(e)))?;
        let assumed = response.credentials;
        if assumed.access_key_id.is_empty() || assumed.secret_access_key.is_empty() {
            return Err(wrap(AuthError::Upstream(
                "agency assume response carries no access key".into(),
            )));
        }

        let expires_at = parse_expiry(assumed.expiration.as_deref(), self.lifetime()).map_err(wrap)?;
        let mut credentials = Credentials::new(assumed.access_key_id, assumed.secret_access_key)
            .with_expiry(expires_at)
            .with_origin(CredentialOrigin::Agency);
        if assumed.security_token.is_empty() {
            tracing::debug!(agency = %self.agency_name, "agency assume response carries no security token");
        } else {
            credentials = credentials.with_security_token(assumed.security_token);
        }

        tracing::info!(
            agency = %self.agency_name,
            access_key = %credentials.access_key(),
            %expires_at,
            "assumed agency role through IAM v5"
        );
        Ok(credentials)
    }

    fn name(&self) -> &'static str {
        "agency_v5"
    }
}

/// Returns the source that assumes `role`, signed by `base`.
pub fn source_for(
    role: &AssumeRole,
    base: AuthenticatedClient,
    sts_endpoint: &str,
) -> Arc<dyn CredentialSource> {
    match role.domain_id() {
        Some(domain_id) => Arc::new(AgencyV5Source::new(
            base,
            sts_endpoint,
            role.agency_name(),
            domain_id,
            role.duration_seconds(),
        )),
        None => Arc::new(AgencySource::new(
            base,
            role.agency_name(),
            role.domain_name().unwrap_or_default(),
        )),
    }
}

/// Assumes each of `roles` in turn, starting from `base`, and returns the
/// key cache of the last agency.
///
/// # Errors
///
/// - [`AuthError::Config`] if `roles` is empty
/// - [`AuthError::AssumeRole`] naming the first agency that failed
pub(crate) async fn assume_chain(
    base: &AuthenticatedClient,
    roles: &[AssumeRole],
    sts_endpoint: &str,
) -> Result<Arc<SecurityKeyCache>> {
    let mut signer = base.clone();
    let mut keys = None;
    for role in roles {
        let source = source_for(role, signer.clone(), sts_endpoint);
        let credentials = source.fetch().await?;
        let cache = Arc::new(SecurityKeyCache::refreshable(credentials, source));
        signer = base.signed_by(Arc::clone(&cache));
        keys = Some(cache);
    }
    keys.ok_or_else(|| AuthError::Config("no agency to assume".into()))
}
