//! Credential resolution.
//!
//! [`CredentialResolver::resolve`] runs once at provider start-up:
//!
//! 1. select the [`AuthMode`]
//! 2. fold in the shared credentials file, or fetch federated or instance
//!    metadata keys
//! 3. build and live-validate a project-scoped and a domain-scoped client
//! 4. optionally assume one agency or a chain of them, and rebuild both
//!    clients as the last agency's account
//! 5. discover the domain ID and check the configured domain name
//!
//! Any failure aborts resolution. Retries happen only inside the transport.

use std::{fmt, sync::Arc};

use hwcloud_transport::{RetryingTransport, RoundTrip, TokenSigner};

use crate::{
    assume_role::assume_chain,
    client::{AuthenticatedClient, ClientScope, SigningContext},
    config::ProviderConfig,
    error::{AuthError, Result},
    federation::FederationSource,
    identity::{self, TokenGrant, TokenIdentity, TokenScope, discover_domain, token_request},
    metadata::MetadataSource,
    mode::{Agency, AuthMode, AuthOptions, agency_scopes, direct_scopes},
    security_key_cache::{CredentialSource, SecurityKeyCache},
    shared_config,
};

/// The outcome of resolution.
#[derive(Debug, Clone)]
pub struct ResolvedCredentials {
    config: ProviderConfig,
    mode: AuthMode,
    project_client: AuthenticatedClient,
    domain_client: AuthenticatedClient,
}

impl ResolvedCredentials {
    /// Returns the working configuration, with shared-file values folded in.
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Returns the selected mode.
    #[must_use]
    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Returns the client scoped to the provider's project.
    #[must_use]
    pub fn project_client(&self) -> &AuthenticatedClient {
        &self.project_client
    }

    /// Returns the client scoped to the account domain.
    #[must_use]
    pub fn domain_client(&self) -> &AuthenticatedClient {
        &self.domain_client
    }

    /// Returns the key cache when requests are signed with AK/SK.
    #[must_use]
    pub fn keys(&self) -> Option<&Arc<SecurityKeyCache>> {
        self.project_client.keys()
    }

    /// Returns the provider region's project ID.
    #[must_use]
    pub fn project_id(&self) -> Option<&str> {
        self.project_client.project_id()
    }

    /// Returns the account domain ID.
    #[must_use]
    pub fn domain_id(&self) -> Option<&str> {
        self.domain_client.domain_id()
    }
}

/// Resolves a [`ProviderConfig`] into authenticated clients.
///
/// # Example
///
/// ```no_run
/// use hwcloud_credentials::{CredentialResolver, ProviderConfig};
///
/// # async fn run() -> hwcloud_credentials::Result<()> {
/// let config = ProviderConfig::from_env()?;
/// let resolved = CredentialResolver::new().resolve(config).await?;
/// println!("mode {} project {:?}", resolved.mode(), resolved.project_id());
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct CredentialResolver {
    base: Option<Arc<dyn RoundTrip>>,
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialResolver").field("custom_transport", &self.base.is_some()).finish()
    }
}

impl CredentialResolver {
    /// Creates a resolver that builds its HTTP client from the configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a resolver that sends every request, including the metadata
    /// fetch, through `base`.
    #[must_use]
    pub fn with_transport(base: Arc<dyn RoundTrip>) -> Self {
        Self { base: Some(base) }
    }

    /// Resolves `config`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Config`] if the region is missing, assume-role is
    ///   combined with token or password authentication, or agency
    ///   delegation is combined with access keys
    /// - [`AuthError::SharedConfig`] / [`AuthError::ProfileNotFound`] for
    ///   shared credentials file problems
    /// - [`AuthError::NoCredentials`] if nothing is configured and instance
    ///   metadata is unavailable
    /// - [`AuthError::Authentication`] if a validation call fails
    /// - [`AuthError::Federation`] if the ID token cannot be exchanged
    /// - [`AuthError::AssumeRole`] if an agency exchange fails
    /// - [`AuthError::DomainMismatch`] if the account's domain name differs
    ///   from the configured one
    #[tracing::instrument(skip_all, fields(mode = tracing::field::Empty, region = tracing::field::Empty))]
    pub async fn resolve(&self, config: ProviderConfig) -> Result<ResolvedCredentials> {
        let mode = AuthMode::select(&config);
        let span = tracing::Span::current();
        span.record("mode", mode.as_str());

        let config = match mode {
            AuthMode::SharedFile => shared_config::apply(config)?,
            _ => config,
        }
        .normalized()?;
        if config.provider_region().is_empty() {
            return Err(AuthError::Config("region should be provided".into()));
        }
        span.record("region", config.provider_region());

        let roles = config.assume_roles()?;
        if !roles.is_empty() && !mode.signs_with_aksk() {
            return Err(AuthError::Config(format!(
                "assume role requires access key authentication, got {mode}"
            )));
        }
        if mode.signs_with_aksk() && config.names_agency() {
            return Err(AuthError::Config(format!(
                "agency_name applies to token and password authentication, got {mode}; \
                 use assume_role_agency with access keys"
            )));
        }

        let transport = Arc::new(self.transport(&config)?);
        let options = match mode {
            AuthMode::Token => AuthOptions::token(&config)?,
            AuthMode::Password => AuthOptions::password(&config)?,
            AuthMode::AkSk | AuthMode::SharedFile => AuthOptions::aksk(&config)?,
            AuthMode::Federation => {
                AuthOptions::with_keys(federated_keys(&config, &transport).await?)
            },
            AuthMode::Metadata => AuthOptions::with_keys(self.metadata_keys(&config).await?),
        };

        let (mut project_client, mut domain_client) =
            authenticate(&config, &transport, &options, mode).await?;

        if let Some(last) = roles.last() {
            let keys = assume_chain(&domain_client, &roles, &config.sts_endpoint()).await?;
            let agency_config = config.for_agency(last);
            (project_client, domain_client) =
                authenticate(&agency_config, &transport, &AuthOptions::with_keys(keys), mode)
                    .await?;
            tracing::info!(
                agencies = roles.len(),
                agency = last.agency_name(),
                domain = last.target(),
                "clients rebuilt for assumed agency"
            );
        }

        tracing::info!(
            mode = mode.as_str(),
            region = config.provider_region(),
            project_id = project_client.project_id().unwrap_or_default(),
            domain_id = domain_client.domain_id().unwrap_or_default(),
            "credentials resolved"
        );
        Ok(ResolvedCredentials { config, mode, project_client, domain_client })
    }

    fn transport(&self, config: &ProviderConfig) -> Result<RetryingTransport> {
        let transport_config = config.transport_config()?;
        Ok(match &self.base {
            Some(base) => RetryingTransport::new(Arc::clone(base), transport_config.retry),
            None => RetryingTransport::from_config(&transport_config)?,
        })
    }

    async fn metadata_keys(&self, config: &ProviderConfig) -> Result<Arc<SecurityKeyCache>> {
        let source = match &self.base {
            Some(base) => MetadataSource::with_transport(Arc::clone(base), config.metadata_endpoint()),
            None => MetadataSource::new(config.metadata_endpoint())?,
        };
        let credentials = source
            .fetch()
            .await
            .map_err(|e| AuthError::NoCredentials { source: Arc::new(e) })?;
        Ok(Arc::new(SecurityKeyCache::refreshable(credentials, Arc::new(source))))
    }
}

/// Trades the configured ID token for refreshable keys.
async fn federated_keys(
    config: &ProviderConfig,
    transport: &Arc<RetryingTransport>,
) -> Result<Arc<SecurityKeyCache>> {
    let (idp, id_token) = config.federation().ok_or_else(|| {
        AuthError::Config("assume_role_idp_id and assume_role_id_token should be provided".into())
    })?;
    let source = Arc::new(FederationSource::new(
        Arc::clone(transport),
        config.identity_endpoint(),
        idp,
        id_token.clone(),
    ));
    let credentials = source.fetch().await?;
    Ok(Arc::new(SecurityKeyCache::refreshable(credentials, source)))
}

/// Builds and validates the project and domain clients for `options`.
async fn authenticate(
    config: &ProviderConfig,
    transport: &Arc<RetryingTransport>,
    options: &AuthOptions,
    mode: AuthMode,
) -> Result<(AuthenticatedClient, AuthenticatedClient)> {
    match options {
        AuthOptions::AkSk { keys, user_catalog } => {
            authenticate_aksk(config, transport, keys, *user_catalog, mode).await
        },
        AuthOptions::Token { .. } | AuthOptions::Password { .. } => {
            authenticate_token(config, transport, options, mode).await
        },
    }
}

async fn authenticate_aksk(
    config: &ProviderConfig,
    transport: &Arc<RetryingTransport>,
    keys: &Arc<SecurityKeyCache>,
    user_catalog: bool,
    mode: AuthMode,
) -> Result<(AuthenticatedClient, AuthenticatedClient)> {
    let endpoint = config.identity_endpoint();
    let region = config.provider_region();
    let signing = SigningContext::AkSk(Arc::clone(keys));
    let configured_domain = config.domain_id().map(str::to_owned);

    let domain_client = AuthenticatedClient::new(
        Arc::clone(transport),
        signing.clone(),
        &endpoint,
        ClientScope::Domain,
        region,
    )
    .with_domain_id(configured_domain.clone());
    let domain = discover_domain(&domain_client, config.domain_name(), mode.as_str()).await?;
    let domain_id = configured_domain.unwrap_or(domain.id);

    let project_base =
        AuthenticatedClient::new(Arc::clone(transport), signing, &endpoint, ClientScope::Project, region);
    let name = config.project_name();
    let projects = project_base
        .list_projects(None, Some(name), user_catalog)
        .await
        .map_err(|e| AuthError::authentication(mode.as_str(), "listing projects", e))?;
    let project_id = match config.project_id() {
        Some(id) => id.to_owned(),
        None => projects
            .into_iter()
            .find(|p| p.name == name)
            .map(|p| p.id)
            .ok_or_else(|| AuthError::Upstream(format!("project {name} was not found")))?,
    };

    let project_client = project_base
        .with_project(project_id, region)
        .with_domain_id(Some(domain_id.clone()));
    let domain_client = domain_client.with_domain_id(Some(domain_id));
    Ok((project_client, domain_client))
}

async fn authenticate_token(
    config: &ProviderConfig,
    transport: &Arc<RetryingTransport>,
    options: &AuthOptions,
    mode: AuthMode,
) -> Result<(AuthenticatedClient, AuthenticatedClient)> {
    let identity_endpoint = config.identity_endpoint();
    let identity = options
        .token_identity(config)
        .ok_or_else(|| AuthError::Config("user_name or user_id should be provided".into()))?;

    let (project_scope, domain_scope) = match options.agency() {
        Some(agency) => agency_scopes(agency),
        None => direct_scopes(config),
    };

    let agency = options.agency();
    let (project_token, project_grant) =
        issue_scoped(transport, &identity_endpoint, identity, agency, project_scope, mode).await?;
    let (domain_token, domain_grant) =
        issue_scoped(transport, &identity_endpoint, identity, agency, domain_scope, mode).await?;

    let domain_id = resolve_domain_id(config, &project_grant, &domain_grant)?;
    let region = config.provider_region();
    let project_id = config
        .project_id()
        .map(str::to_owned)
        .or(project_grant.project_id)
        .unwrap_or_default();

    let project_client = AuthenticatedClient::new(
        Arc::clone(transport),
        SigningContext::Token(TokenSigner::new(project_token)),
        &identity_endpoint,
        ClientScope::Project,
        region,
    )
    .with_project(project_id, region)
    .with_domain_id(domain_id.clone());
    let domain_client = AuthenticatedClient::new(
        Arc::clone(transport),
        SigningContext::Token(TokenSigner::new(domain_token)),
        &identity_endpoint,
        ClientScope::Domain,
        region,
    )
    .with_domain_id(domain_id);
    Ok((project_client, domain_client))
}

/// Issues one scoped token, going through `assume_role` under agency
/// delegation.
async fn issue_scoped(
    transport: &RetryingTransport,
    identity_endpoint: &str,
    identity: TokenIdentity<'_>,
    agency: Option<&Agency>,
    scope: TokenScope<'_>,
    mode: AuthMode,
) -> Result<(String, TokenGrant)> {
    let Some(agency) = agency else {
        let body = token_request(identity, scope);
        return identity::issue_token(transport, identity_endpoint, &body, None, mode.as_str()).await;
    };

    // The caller's own token authorizes the assume_role request.
    let base = match identity {
        TokenIdentity::Token(token) => token.to_owned(),
        _ => {
            let body = token_request(identity, TokenScope::Unscoped);
            identity::issue_token(transport, identity_endpoint, &body, None, mode.as_str()).await?.0
        },
    };
    let body = token_request(
        TokenIdentity::AssumeRole {
            agency_name: &agency.name,
            agency_domain_name: &agency.domain_name,
        },
        scope,
    );
    let bearer = TokenSigner::new(base);
    identity::issue_token(transport, identity_endpoint, &body, Some(&bearer), mode.as_str()).await
}

/// Picks the domain ID for token clients and checks the configured name.
fn resolve_domain_id(
    config: &ProviderConfig,
    project_grant: &TokenGrant,
    domain_grant: &TokenGrant,
) -> Result<Option<String>> {
    let discovered = domain_grant.domain.as_ref().or(project_grant.domain.as_ref());
    if let Some(domain) = discovered {
        identity::check_domain_name(config.domain_name(), domain)?;
    }
    Ok(config.domain_id().map(str::to_owned).or_else(|| discovered.map(|d| d.id.clone())))
}
