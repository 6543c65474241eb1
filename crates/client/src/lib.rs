//! # hwcloud client
//!
//! Per-service clients for Huawei Cloud, built on resolved credentials.
//!
//! This crate provides:
//! - **Service catalog**: the static table of host names, API versions and
//!   URL shapes per service key
//! - **Project-ID cache**: region to project-ID lookups, one upstream query
//!   per miss even under concurrent callers
//! - **Client factory**: endpoint composition, custom endpoint overrides and
//!   refresh of temporary keys before each client is handed out
//!
//! ## Example
//!
//! ```no_run
//! use hwcloud_client::ServiceClientFactory;
//! use hwcloud_credentials::{CredentialResolver, ProviderConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProviderConfig::builder()
//!     .region("cn-north-4")
//!     .access_key("AK")
//!     .secret_key("SK")
//!     .build()?;
//! let credentials = CredentialResolver::new().resolve(config).await?;
//! let factory = ServiceClientFactory::builder().credentials(credentials).build();
//!
//! let vpc = factory.service_client("vpc", "cn-east-3").await?;
//! let vpcs: serde_json::Value = vpc.client().get_json(&vpc.service_url(&["vpcs"])).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Service catalog.
pub mod catalog;
/// Error types.
pub mod error;
/// Service client factory.
pub mod factory;
/// Region to project-ID cache.
pub mod project_cache;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use catalog::{CatalogEntry, ServiceCatalog};
pub use error::{ClientError, Result};
pub use factory::{ServiceClient, ServiceClientFactory};
pub use project_cache::ProjectIdCache;

const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<ServiceClientFactory>();
    assert_send_sync::<ServiceClient>();
    assert_send_sync::<ProjectIdCache>();
};
