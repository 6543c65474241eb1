//! Identity service calls used during resolution.
//!
//! | Call | Used by |
//! |---|---|
//! | `POST {identity}/auth/tokens` | token and password modes |
//! | `GET {identity}/projects?name=` | AK/SK project validation |
//! | `GET {identity}/auth/projects` | AK/SK with a security token |
//! | `GET {identity}/auth/domains` | domain ID discovery |
//! | `GET {identity}/projects?domain_id=&name=` | per-region project lookup |

use http::Method;
use hwcloud_transport::{HttpResponse, RetryingTransport, TokenSigner, TransportError};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    client::AuthenticatedClient,
    error::{AuthError, Result},
};

/// Header carrying an issued token.
pub const HEADER_SUBJECT_TOKEN: &str = "x-subject-token";

/// A project as listed by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProjectEntry {
    /// Project ID.
    pub id: String,
    /// Project name; by convention equal to the region name.
    pub name: String,
    /// Owning domain, when reported.
    #[serde(default)]
    pub domain_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectList {
    #[serde(default)]
    projects: Vec<ProjectEntry>,
}

/// An account domain as listed by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DomainEntry {
    /// Domain ID.
    pub id: String,
    /// Domain name.
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct DomainList {
    #[serde(default)]
    domains: Vec<DomainEntry>,
}

/// What an issued token is scoped to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenGrant {
    /// Project ID of a project-scoped token.
    pub project_id: Option<String>,
    /// Account domain of the token's user or scope.
    pub domain: Option<DomainEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenEnvelope {
    #[serde(default)]
    token: TokenBody,
}

#[derive(Debug, Default, Deserialize)]
struct TokenBody {
    project: Option<ScopedProject>,
    domain: Option<DomainEntry>,
    user: Option<TokenUser>,
}

#[derive(Debug, Deserialize)]
struct ScopedProject {
    id: String,
    domain: Option<DomainEntry>,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    domain: Option<DomainEntry>,
}

/// Identifier of a user or scope target: by ID when known, else by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameOrId<'a> {
    /// Identified by ID.
    Id(&'a str),
    /// Identified by name.
    Name(&'a str),
}

impl<'a> NameOrId<'a> {
    /// Prefers `id` when non-empty.
    #[must_use]
    pub fn pick(id: Option<&'a str>, name: Option<&'a str>) -> Option<Self> {
        match (id.filter(|s| !s.is_empty()), name.filter(|s| !s.is_empty())) {
            (Some(id), _) => Some(Self::Id(id)),
            (None, Some(name)) => Some(Self::Name(name)),
            (None, None) => None,
        }
    }

    fn to_json(self) -> Value {
        match self {
            Self::Id(id) => json!({ "id": id }),
            Self::Name(name) => json!({ "name": name }),
        }
    }
}

/// The identity half of a token request.
#[derive(Debug, Clone, Copy)]
pub enum TokenIdentity<'a> {
    /// Exchange an existing token.
    Token(&'a str),
    /// Authenticate a user with a password.
    Password {
        /// The user.
        user: NameOrId<'a>,
        /// The user's domain; required when the user is named.
        domain: Option<NameOrId<'a>>,
        /// The password.
        password: &'a str,
    },
    /// Assume an agency, authenticated by the `X-Auth-Token` header.
    AssumeRole {
        /// Agency (role) name.
        agency_name: &'a str,
        /// Domain that owns the agency.
        agency_domain_name: &'a str,
    },
}

impl TokenIdentity<'_> {
    fn to_json(self) -> Value {
        match self {
            Self::Token(id) => json!({ "methods": ["token"], "token": { "id": id } }),
            Self::Password { user, domain, password } => {
                let mut user = user.to_json();
                if let Some(domain) = domain {
                    user["domain"] = domain.to_json();
                }
                user["password"] = Value::from(password);
                json!({ "methods": ["password"], "password": { "user": user } })
            },
            Self::AssumeRole { agency_name, agency_domain_name } => json!({
                "methods": ["assume_role"],
                "assume_role": { "domain_name": agency_domain_name, "xrole_name": agency_name },
            }),
        }
    }
}

/// The scope half of a token request.
#[derive(Debug, Clone, Copy)]
pub enum TokenScope<'a> {
    /// A project, by ID or by name within a domain.
    Project {
        /// The project.
        project: NameOrId<'a>,
        /// Domain of a named project.
        domain: Option<NameOrId<'a>>,
    },
    /// The account domain.
    Domain(NameOrId<'a>),
    /// No scope.
    Unscoped,
}

impl TokenScope<'_> {
    fn to_json(self) -> Option<Value> {
        match self {
            Self::Project { project, domain } => {
                let mut project = project.to_json();
                if let Some(domain) = domain {
                    project["domain"] = domain.to_json();
                }
                Some(json!({ "project": project }))
            },
            Self::Domain(domain) => Some(json!({ "domain": domain.to_json() })),
            Self::Unscoped => None,
        }
    }
}

/// Builds the JSON document for `POST /auth/tokens`.
#[must_use]
pub fn token_request(identity: TokenIdentity<'_>, scope: TokenScope<'_>) -> Value {
    let mut auth = json!({ "identity": identity.to_json() });
    if let Some(scope) = scope.to_json() {
        auth["scope"] = scope;
    }
    json!({ "auth": auth })
}

/// Requests a token, returning it with its scope.
///
/// `bearer` authenticates the request itself (needed for `assume_role`).
///
/// # Errors
///
/// - [`AuthError::Authentication`] if the identity service rejects the
///   request or cannot be reached
/// - [`AuthError::Upstream`] if the answer carries no `X-Subject-Token`,
///   or a body that is not a token document
pub async fn issue_token(
    transport: &RetryingTransport,
    identity_endpoint: &str,
    body: &Value,
    bearer: Option<&TokenSigner>,
    mode: &'static str,
) -> Result<(String, TokenGrant)> {
    let url = format!("{identity_endpoint}/auth/tokens");
    let response = post_unsigned(transport, &url, body, bearer, &[])
        .await
        .map_err(|e| AuthError::authentication(mode, "requesting a token", e))?;

    let token = response
        .header(HEADER_SUBJECT_TOKEN)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::Upstream("token response carries no X-Subject-Token".into()))?
        .to_owned();

    // An empty body still carries a usable token; anything else must decode.
    let envelope: TokenEnvelope = if response.body.iter().all(u8::is_ascii_whitespace) {
        TokenEnvelope::default()
    } else {
        response.json().map_err(|e| AuthError::Upstream(format!("invalid token body: {e}")))?
    };
    let body = envelope.token;
    let project_domain = body.project.as_ref().and_then(|p| p.domain.clone());
    let grant = TokenGrant {
        project_id: body.project.map(|p| p.id),
        domain: body.domain.or(project_domain).or(body.user.and_then(|u| u.domain)),
    };
    Ok((token, grant))
}

/// Posts `body` to an identity URL that is not AK/SK signed: the token
/// issuing and federation calls. `bearer` adds `X-Auth-Token`.
pub(crate) async fn post_unsigned(
    transport: &RetryingTransport,
    url: &str,
    body: &Value,
    bearer: Option<&TokenSigner>,
    headers: &[(&'static str, &str)],
) -> Result<HttpResponse, TransportError> {
    let url = url::Url::parse(url)
        .map_err(|e| TransportError::invalid_request_with_source("invalid identity endpoint", e))?;
    let mut request = reqwest::Request::new(Method::POST, url);
    request.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    for (name, value) in headers {
        let value = http::HeaderValue::from_str(value)
            .map_err(|e| TransportError::invalid_request_with_source(format!("invalid {name} header"), e))?;
        request.headers_mut().insert(*name, value);
    }
    *request.body_mut() = Some(body.to_string().into());
    if let Some(bearer) = bearer {
        hwcloud_transport::RequestSigner::sign(bearer, &mut request)?;
    }
    transport.send(request, None).await?.error_for_status()
}

impl AuthenticatedClient {
    /// Lists projects visible to this client.
    ///
    /// With `user_catalog`, the caller's own catalog (`auth/projects`) is
    /// read instead; temporary credentials may only read that catalog, and
    /// it ignores `domain_id` and `name`. Either way the answer may hold
    /// more than the named project, so callers match names themselves.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the call fails.
    pub async fn list_projects(
        &self,
        domain_id: Option<&str>,
        name: Option<&str>,
        user_catalog: bool,
    ) -> Result<Vec<ProjectEntry>, TransportError> {
        let base = self.identity_endpoint();
        let list: ProjectList = if user_catalog {
            self.get_json(&format!("{base}/auth/projects")).await?
        } else {
            let mut url = url::Url::parse(&format!("{base}/projects")).map_err(|e| {
                TransportError::invalid_request_with_source("invalid identity endpoint", e)
            })?;
            {
                let mut query = url.query_pairs_mut();
                if let Some(domain_id) = domain_id.filter(|d| !d.is_empty()) {
                    query.append_pair("domain_id", domain_id);
                }
                if let Some(name) = name {
                    query.append_pair("name", name);
                }
            }
            self.get_json(url.as_str()).await?
        };

        Ok(list.projects)
    }

    /// Lists the account domains visible to this client.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the call fails.
    pub async fn list_domains(&self) -> Result<Vec<DomainEntry>, TransportError> {
        let list: DomainList =
            self.get_json(&format!("{}/auth/domains", self.identity_endpoint())).await?;
        Ok(list.domains)
    }
}

/// Reads the account domain and checks it against the configured name.
///
/// # Errors
///
/// - [`AuthError::Authentication`] if the call fails
/// - [`AuthError::Upstream`] if no domain is visible
/// - [`AuthError::DomainMismatch`] if `expected_name` differs from the
///   account's domain name
pub async fn discover_domain(
    client: &AuthenticatedClient,
    expected_name: Option<&str>,
    mode: &'static str,
) -> Result<DomainEntry> {
    let domains = client
        .list_domains()
        .await
        .map_err(|e| AuthError::authentication(mode, "listing domains", e))?;
    let domain = domains
        .into_iter()
        .next()
        .ok_or_else(|| AuthError::Upstream("domain was not found".into()))?;
    check_domain_name(expected_name, &domain)?;
    Ok(domain)
}

pub(crate) fn check_domain_name(expected: Option<&str>, domain: &DomainEntry) -> Result<()> {
    match expected.filter(|n| !n.is_empty()) {
        Some(expected) if !domain.name.is_empty() && expected != domain.name => {
            Err(AuthError::DomainMismatch {
                expected: expected.to_owned(),
                actual: domain.name.clone(),
            })
        },
        _ => Ok(()),
    }
}
