//! Authentication mode selection.
//!
//! Exactly one mode is active. The first match wins:
//!
//! 1. [`AuthMode::Token`]: a static token
//! 2. [`AuthMode::AkSk`]: an access key and a secret key
//! 3. [`AuthMode::Password`]: a password plus a user name or user ID
//! 4. [`AuthMode::Federation`]: an identity provider ID and an ID token
//! 5. [`AuthMode::SharedFile`]: a shared credentials file or profile
//! 6. [`AuthMode::Metadata`]: nothing configured; instance metadata
//!
//! Federation, shared-file and metadata modes end up signing with AK/SK, so
//! once their keys are known they are handled as [`AuthOptions::AkSk`].

use std::{fmt, sync::Arc};

use crate::{
    config::{ProviderConfig, non_empty},
    credentials::{Credentials, Secret},
    error::{AuthError, Result},
    identity::{NameOrId, TokenIdentity, TokenScope},
    security_key_cache::SecurityKeyCache,
};

/// The active authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMode {
    /// A static IAM token.
    Token,
    /// A long-lived or temporary access key pair.
    AkSk,
    /// User name (or ID) and password.
    Password,
    /// Temporary keys issued for an identity-provider ID token.
    Federation,
    /// Keys read from a shared credentials file profile.
    SharedFile,
    /// Temporary keys from the instance metadata service.
    Metadata,
}

impl AuthMode {
    /// Selects the mode for `config`.
    #[must_use]
    pub fn select(config: &ProviderConfig) -> Self {
        let set = |secret: &Option<Secret>| secret.as_ref().is_some_and(|s| !s.is_empty());

        if set(&config.token) {
            Self::Token
        } else if non_empty(config.access_key.as_deref()).is_some() && set(&config.secret_key) {
            Self::AkSk
        } else if set(&config.password)
            && (non_empty(config.user_name.as_deref()).is_some()
                || non_empty(config.user_id.as_deref()).is_some())
        {
            Self::Password
        } else if config.federation().is_some() {
            Self::Federation
        } else if config.uses_shared_config() {
            Self::SharedFile
        } else {
            Self::Metadata
        }
    }

    /// Returns the mode name used in logs and errors.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::AkSk => "aksk",
            Self::Password => "password",
            Self::Federation => "federation",
            Self::SharedFile => "shared_config",
            Self::Metadata => "metadata",
        }
    }

    /// Returns `true` if requests end up signed with AK/SK.
    #[must_use]
    pub fn signs_with_aksk(self) -> bool {
        matches!(self, Self::AkSk | Self::Federation | Self::SharedFile | Self::Metadata)
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agency delegation for token and password modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Agency {
    pub(crate) name: String,
    pub(crate) domain_name: String,
    pub(crate) delegated_project: String,
}

/// Normalized options for one mode; each variant yields a project-scoped
/// and a domain-scoped client.
#[derive(Debug, Clone)]
pub(crate) enum AuthOptions {
    Token {
        token: Secret,
        agency: Option<Agency>,
    },
    Password {
        user_name: Option<String>,
        user_id: Option<String>,
        password: Secret,
        agency: Option<Agency>,
    },
    AkSk {
        keys: Arc<SecurityKeyCache>,
        /// Temporary keys may only read the caller's own project catalog.
        user_catalog: bool,
    },
}

impl AuthOptions {
    /// Token options from `config`.
    pub(crate) fn token(config: &ProviderConfig) -> Result<Self> {
        let token = config
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::Config("token should be provided".into()))?;
        Ok(Self::Token { token, agency: agency(config) })
    }

    /// Password options from `config`.
    pub(crate) fn password(config: &ProviderConfig) -> Result<Self> {
        let password = config
            .password
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AuthError::Config("password should be provided".into()))?;
        Ok(Self::Password {
            user_name: non_empty(config.user_name.as_deref()).map(str::to_owned),
            user_id: non_empty(config.user_id.as_deref()).map(str::to_owned),
            password,
            agency: agency(config),
        })
    }

    /// Static AK/SK options from `config`.
    pub(crate) fn aksk(config: &ProviderConfig) -> Result<Self> {
        let access_key = non_empty(config.access_key.as_deref())
            .ok_or_else(|| AuthError::Config("access_key should be provided".into()))?;
        let secret_key = config
            .secret_key
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::Config("secret_key should be provided".into()))?;

        let mut credentials = Credentials::new(access_key, secret_key);
        if let Some(token) = &config.security_token {
            credentials = credentials.with_security_token(token.expose());
        }
        Ok(Self::with_keys(Arc::new(SecurityKeyCache::fixed(credentials))))
    }

    /// AK/SK options over an existing key cache.
    pub(crate) fn with_keys(keys: Arc<SecurityKeyCache>) -> Self {
        let user_catalog = keys.current().security_token().is_some();
        Self::AkSk { keys, user_catalog }
    }

    /// Returns the token request identity, for token and password options.
    pub(crate) fn token_identity<'a>(
        &'a self,
        config: &'a ProviderConfig,
    ) -> Option<TokenIdentity<'a>> {
        match self {
            Self::Token { token, .. } => Some(TokenIdentity::Token(token.expose())),
            Self::Password { user_name, user_id, password, .. } => {
                let user = NameOrId::pick(user_id.as_deref(), user_name.as_deref())?;
                let domain = match user {
                    NameOrId::Name(_) => user_domain(config),
                    NameOrId::Id(_) => None,
                };
                Some(TokenIdentity::Password { user, domain, password: password.expose() })
            },
            Self::AkSk { .. } => None,
        }
    }

    /// Returns the agency delegation of token and password options.
    pub(crate) fn agency(&self) -> Option<&Agency> {
        match self {
            Self::Token { agency, .. } | Self::Password { agency, .. } => agency.as_ref(),
            Self::AkSk { .. } => None,
        }
    }
}

/// Scopes for the project and domain clients without agency delegation.
pub(crate) fn direct_scopes(config: &ProviderConfig) -> (TokenScope<'_>, TokenScope<'_>) {
    let domain = NameOrId::pick(config.domain_id(), config.domain_name());
    let project = match config.project_id() {
        Some(id) => TokenScope::Project { project: NameOrId::Id(id), domain: None },
        None => TokenScope::Project { project: NameOrId::Name(config.project_name()), domain },
    };
    let domain = domain.map_or(TokenScope::Unscoped, TokenScope::Domain);
    (project, domain)
}

/// Scopes for the project and domain clients under agency delegation.
pub(crate) fn agency_scopes(agency: &Agency) -> (TokenScope<'_>, TokenScope<'_>) {
    (
        TokenScope::Project { project: NameOrId::Name(&agency.delegated_project), domain: None },
        TokenScope::Domain(NameOrId::Name(&agency.domain_name)),
    )
}

fn user_domain(config: &ProviderConfig) -> Option<NameOrId<'_>> {
    NameOrId::pick(config.domain_id(), config.domain_name())
}

fn agency(config: &ProviderConfig) -> Option<Agency> {
    config.agency().map(|(name, domain_name)| Agency {
        name: name.to_owned(),
        domain_name: domain_name.to_owned(),
        delegated_project: config.delegated_project().to_owned(),
    })
}
