//! Credential resolution error types.
//!
//! Errors fall into three groups:
//!
//! - configuration: nothing usable was configured, or a shared-config
//!   profile is missing; never retried
//! - transport: the identity or metadata service could not be reached
//!   after the transport's own retries
//! - upstream: the service answered, but not with what resolution needs
//!   (missing token header, domain name mismatch)

use std::sync::Arc;

use hwcloud_transport::{BoxError, TransportError};
use thiserror::Error;

/// Result type alias for credential operations.
pub type Result<T, E = AuthError> = std::result::Result<T, E>;

/// Credential resolution and refresh errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Invalid or incomplete provider configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The shared credentials file could not be read or parsed.
    #[error("Shared config file {path}: {message}")]
    SharedConfig {
        /// File path.
        path: String,
        /// What went wrong.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// No profile in the shared credentials file matches.
    #[error("Profile {profile:?} not found in shared config file {path}")]
    ProfileNotFound {
        /// Profile that was looked for.
        profile: String,
        /// File path.
        path: String,
    },

    /// Nothing was configured and the instance metadata fallback failed.
    #[error(
        "No usable credentials: set a token, an access key and secret key, a user name and \
         password, or a shared config file"
    )]
    NoCredentials {
        /// Why the metadata fallback failed.
        #[source]
        source: BoxError,
    },

    /// The instance metadata service did not yield usable credentials.
    #[error("Instance metadata credentials unavailable: {message}")]
    Metadata {
        /// What went wrong.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// The assume-role exchange failed.
    #[error("Assume role {agency} in domain {domain} failed")]
    AssumeRole {
        /// Agency name.
        agency: String,
        /// Target domain name, or domain ID for IAM v5 agencies.
        domain: String,
        /// The underlying error.
        #[source]
        source: BoxError,
    },

    /// Exchanging an identity-provider ID token for keys failed.
    #[error("Federation through identity provider {idp} failed")]
    Federation {
        /// Identity provider ID.
        idp: String,
        /// The underlying error.
        #[source]
        source: BoxError,
    },

    /// A live authentication call failed.
    #[error("Authentication failed ({mode}): {message}")]
    Authentication {
        /// Authentication mode in use.
        mode: &'static str,
        /// What was being validated.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// The configured domain name does not match the account.
    #[error("Domain {expected} was not found, got {actual}")]
    DomainMismatch {
        /// Configured domain name.
        expected: String,
        /// Domain name reported by the identity service.
        actual: String,
    },

    /// The identity service answered with something unusable.
    #[error("Unexpected identity service response: {0}")]
    Upstream(String),

    /// Transport failure outside a specific authentication step.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl AuthError {
    /// Creates a `Metadata` error.
    #[must_use]
    pub fn metadata(message: impl Into<String>) -> Self {
        Self::Metadata { message: message.into(), source: None }
    }

    /// Creates a `Metadata` error with a source error.
    #[must_use]
    pub fn metadata_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Metadata { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates an `Authentication` error wrapping a transport failure.
    #[must_use]
    pub fn authentication(
        mode: &'static str,
        message: impl Into<String>,
        source: TransportError,
    ) -> Self {
        Self::Authentication { mode, message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a `SharedConfig` error.
    #[must_use]
    pub fn shared_config(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SharedConfig { path: path.into(), message: message.into(), source: None }
    }

    /// Creates a `SharedConfig` error with a source error.
    #[must_use]
    pub fn shared_config_with_source(
        path: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::SharedConfig {
            path: path.into(),
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Returns `true` for errors caused by configuration rather than by a
    /// remote service.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::SharedConfig { .. }
                | Self::ProfileNotFound { .. }
                | Self::NoCredentials { .. }
        )
    }

    /// Returns `true` if the root cause is a transient transport failure.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        let source = match self {
            Self::Transport(err) => return err.is_transient(),
            Self::Metadata { source, .. } | Self::Authentication { source, .. } => source.as_ref(),
            Self::AssumeRole { source, .. }
            | Self::Federation { source, .. }
            | Self::NoCredentials { source } => Some(source),
            _ => None,
        };
        source
            .and_then(|s| s.downcast_ref::<TransportError>())
            .is_some_and(TransportError::is_transient)
    }
}
