//! Service client error types.

use hwcloud_credentials::AuthError;
use hwcloud_transport::TransportError;
use thiserror::Error;

/// Result type alias for service client operations.
pub type Result<T, E = ClientError> = std::result::Result<T, E>;

/// Errors building a service client.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// The service key is not in the catalog.
    #[error("Service type {service} is invalid or not supported")]
    UnknownService {
        /// The requested key.
        service: String,
    },

    /// The catalog entry lacks a host name or version, and no custom
    /// endpoint is set.
    #[error("Service {service} needs a custom endpoint: the catalog has no name or API version")]
    IncompleteCatalog {
        /// The requested key.
        service: String,
    },

    /// A region other than the provider's was requested without AK/SK
    /// credentials.
    #[error(
        "Resource-level region {region} must be the same as provider-level region \
         {provider_region} when not using AK/SK authentication"
    )]
    ForeignRegion {
        /// The requested region.
        region: String,
        /// The provider region.
        provider_region: String,
    },

    /// No project matches the region name.
    #[error("Wrong name or no access to the region: {region}")]
    ProjectNotFound {
        /// The requested region.
        region: String,
    },

    /// Listing projects failed.
    #[error("List projects for region {region} failed")]
    ProjectLookup {
        /// The requested region.
        region: String,
        /// The underlying error.
        #[source]
        source: TransportError,
    },

    /// Refreshing temporary credentials failed.
    #[error("Credentials for service {service} in region {region} are unavailable")]
    Auth {
        /// The requested key.
        service: String,
        /// The requested region.
        region: String,
        /// The underlying error.
        #[source]
        source: AuthError,
    },
}

impl ClientError {
    /// Returns `true` for errors caused by configuration rather than by a
    /// remote service.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownService { .. } | Self::IncompleteCatalog { .. } | Self::ForeignRegion { .. }
        )
    }

    /// Returns `true` if the root cause is a transient transport failure.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ProjectLookup { source, .. } => source.is_transient(),
            Self::Auth { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_region() {
        let err = ClientError::ProjectNotFound { region: "ap-southeast-9".into() };
        assert_eq!(err.to_string(), "Wrong name or no access to the region: ap-southeast-9");

        let err = ClientError::ForeignRegion {
            region: "cn-east-3".into(),
            provider_region: "cn-north-4".into(),
        };
        assert!(err.to_string().contains("cn-east-3"));
        assert!(err.to_string().contains("cn-north-4"));
    }

    #[test]
    fn test_classification() {
        assert!(ClientError::UnknownService { service: "x".into() }.is_configuration());
        assert!(!ClientError::ProjectNotFound { region: "r".into() }.is_configuration());

        let err = ClientError::ProjectLookup {
            region: "r".into(),
            source: TransportError::connection_reset("reset"),
        };
        assert!(err.is_transient());
        assert!(!err.is_configuration());
    }
}
