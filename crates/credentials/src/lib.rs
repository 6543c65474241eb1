//! # hwcloud credentials
//!
//! Turns provider configuration into authenticated Huawei Cloud clients.
//!
//! This crate provides:
//! - **Mode selection**: token, AK/SK, password, identity-provider
//!   federation, shared credentials file or instance metadata, in that
//!   order of precedence
//! - **Validation**: every mode is checked with live identity calls before
//!   any client is handed out
//! - **Temporary keys**: metadata, federated and agency keys are cached and
//!   refreshed on demand, one refresh at a time
//! - **Assume role**: optional exchange of base keys for agency keys, by
//!   domain name or through IAM v5, singly or as a chain
//!
//! ## Example
//!
//! ```no_run
//! use hwcloud_credentials::{CredentialResolver, ProviderConfig};
//!
//! # async fn example() -> hwcloud_credentials::Result<()> {
//! let config = ProviderConfig::builder()
//!     .region("cn-north-4")
//!     .access_key("AK")
//!     .secret_key("SK")
//!     .build()?;
//!
//! let resolved = CredentialResolver::new().resolve(config).await?;
//! let client = resolved.project_client();
//! client.refresh_credentials().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Assume-role exchange.
pub mod assume_role;
/// Authenticated clients.
pub mod client;
/// Provider configuration.
pub mod config;
/// Credential values.
pub mod credentials;
/// Error types.
pub mod error;
/// Identity-provider federation.
pub mod federation;
/// Identity service calls.
pub mod identity;
/// Instance metadata credentials.
pub mod metadata;
/// Authentication mode selection.
pub mod mode;
/// Credential resolution.
pub mod resolver;
/// Temporary key caching.
pub mod security_key_cache;
/// Shared credentials file.
pub mod shared_config;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use assume_role::{AgencySource, AgencyV5Source};
pub use client::{AuthenticatedClient, ClientScope, SigningContext};
pub use config::{AssumeRole, ProviderConfig};
pub use credentials::{CredentialOrigin, Credentials, Secret};
pub use error::{AuthError, Result};
pub use federation::FederationSource;
pub use identity::{DomainEntry, ProjectEntry};
pub use metadata::MetadataSource;
pub use mode::AuthMode;
pub use resolver::{CredentialResolver, ResolvedCredentials};
pub use security_key_cache::{CredentialSource, SecurityKeyCache};
pub use shared_config::SharedConfig;

// Shared across tasks behind `Arc` or cloned per service client.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<AuthenticatedClient>();
    assert_send_sync::<SecurityKeyCache>();
    assert_send_sync::<ResolvedCredentials>();
    assert_send_sync::<ProviderConfig>();
};
