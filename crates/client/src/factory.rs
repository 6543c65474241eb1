//! Per-service client factory.
//!
//! [`ServiceClientFactory`] turns resolved credentials into clients for a
//! named service in a named region. It owns the only mutable state a
//! provider needs after start-up: the region to project-ID cache. The
//! security key cache lives inside the credentials and is shared by every
//! client the factory hands out.

use std::collections::HashMap;

use hwcloud_credentials::{AuthenticatedClient, ProviderConfig, ResolvedCredentials};

use crate::{
    catalog::{CatalogEntry, ServiceCatalog},
    error::{ClientError, Result},
    project_cache::ProjectIdCache,
};

/// Catalog key reported when a project lookup cannot refresh its keys.
const IDENTITY_SERVICE: &str = "identity";

/// A client bound to one service, region and project.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    service: String,
    client: AuthenticatedClient,
    endpoint: String,
    resource_base: String,
}

impl ServiceClient {
    /// Returns the catalog key this client was built for.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the authenticated client carrying the project and region.
    #[must_use]
    pub fn client(&self) -> &AuthenticatedClient {
        &self.client
    }

    /// Returns the service endpoint, ending with `/`.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the resource base, ending with `/`.
    #[must_use]
    pub fn resource_base(&self) -> &str {
        &self.resource_base
    }

    /// Returns the project ID the client is scoped to, if any.
    #[must_use]
    pub fn project_id(&self) -> Option<&str> {
        self.client.project_id()
    }

    /// Returns the region the client is scoped to.
    #[must_use]
    pub fn region(&self) -> &str {
        self.client.region()
    }

    /// Joins `parts` onto the resource base.
    ///
    /// ```
    /// # fn demo(client: &hwcloud_client::ServiceClient) {
    /// let url = client.service_url(&["servers", "detail"]);
    /// assert!(url.ends_with("/servers/detail"));
    /// # }
    /// ```
    #[must_use]
    pub fn service_url(&self, parts: &[&str]) -> String {
        format!("{}{}", self.resource_base, parts.join("/"))
    }
}

/// Builds [`ServiceClient`]s from resolved credentials.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
///
/// # Example
///
/// ```no_run
/// use hwcloud_client::ServiceClientFactory;
/// use hwcloud_credentials::{CredentialResolver, ProviderConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ProviderConfig::from_env()?;
/// let credentials = CredentialResolver::new().resolve(config).await?;
/// let factory = ServiceClientFactory::builder().credentials(credentials).build();
///
/// let ecs = factory.service_client("ecs", "cn-north-4").await?;
/// println!("{}", ecs.service_url(&["cloudservers", "detail"]));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ServiceClientFactory {
    credentials: ResolvedCredentials,
    catalog: ServiceCatalog,
    endpoints: HashMap<String, String>,
    projects: ProjectIdCache,
}

#[bon::bon]
impl ServiceClientFactory {
    /// Creates a factory.
    ///
    /// The catalog defaults to [`ServiceCatalog::builtin`]. Custom endpoints
    /// from the configuration are copied onto derived catalog keys, and the
    /// provider region's project ID is cached up front.
    #[builder]
    pub fn new(credentials: ResolvedCredentials, catalog: Option<ServiceCatalog>) -> Self {
        let catalog = catalog.unwrap_or_else(|| ServiceCatalog::builtin().clone());
        let endpoints = expand_endpoints(&catalog, credentials.config());
        let projects = match credentials.project_id() {
            Some(project_id) => {
                ProjectIdCache::seeded(credentials.config().provider_region(), project_id)
            },
            None => ProjectIdCache::new(),
        };
        Self { credentials, catalog, endpoints, projects }
    }
}

impl ServiceClientFactory {
    /// Returns the resolved credentials.
    #[must_use]
    pub fn credentials(&self) -> &ResolvedCredentials {
        &self.credentials
    }

    /// Returns the provider configuration.
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        self.credentials.config()
    }

    /// Returns the catalog in use.
    #[must_use]
    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    /// Returns the project-ID cache.
    #[must_use]
    pub fn projects(&self) -> &ProjectIdCache {
        &self.projects
    }

    /// Returns the custom endpoint in effect for `service`, after derived
    /// keys are filled in.
    #[must_use]
    pub fn custom_endpoint(&self, service: &str) -> Option<&str> {
        self.endpoints.get(service).map(String::as_str)
    }

    /// Returns `explicit` if non-empty, otherwise the provider region.
    #[must_use]
    pub fn region<'a>(&'a self, explicit: Option<&'a str>) -> &'a str {
        self.config().region(explicit)
    }

    /// Returns `explicit` if non-empty, otherwise the provider-level
    /// enterprise project ID.
    #[must_use]
    pub fn enterprise_project_id<'a>(&'a self, explicit: Option<&'a str>) -> Option<&'a str> {
        self.config().enterprise_project_id(explicit)
    }

    /// Returns the object storage endpoint for `region`.
    ///
    /// A custom `obs` endpoint wins whatever the region.
    #[must_use]
    pub fn obs_endpoint(&self, region: &str) -> String {
        match self.custom_endpoint("obs") {
            Some(endpoint) => endpoint.to_owned(),
            None => format!("https://obs.{}.{}/", self.region(Some(region)), self.config().cloud()),
        }
    }

    /// Returns the project ID for `region`, listing projects on a cache
    /// miss. An empty region means the provider region.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Auth`] if refreshing temporary keys fails
    /// - [`ClientError::ProjectLookup`] if the list call fails
    /// - [`ClientError::ProjectNotFound`] if the account has no project
    ///   named `region`
    pub async fn project_id(&self, region: &str) -> Result<String> {
        let region = self.region(Some(region));
        let client = self.credentials.project_client();
        client.refresh_credentials().await.map_err(|source| ClientError::Auth {
            service: IDENTITY_SERVICE.to_owned(),
            region: region.to_owned(),
            source,
        })?;
        self.lookup_project(region).await
    }

    /// Cache lookup without a refresh; callers refresh first.
    async fn lookup_project(&self, region: &str) -> Result<String> {
        self.projects.get_or_load(region, self.credentials.project_client()).await
    }

    /// Builds a client for `service` in `region`. An empty region means the
    /// provider region.
    ///
    /// Temporary keys near expiry are refreshed first.
    ///
    /// # Errors
    ///
    /// - [`ClientError::UnknownService`] if `service` is not in the catalog
    /// - [`ClientError::Auth`] if refreshing temporary keys fails
    /// - [`ClientError::IncompleteCatalog`] if the entry cannot build an
    ///   endpoint and no custom endpoint is set
    /// - [`ClientError::ForeignRegion`] if `region` is not the provider
    ///   region and the credentials are not access keys
    /// - [`ClientError::ProjectLookup`] / [`ClientError::ProjectNotFound`]
    ///   if the region's project cannot be found
    #[tracing::instrument(skip(self), fields(endpoint = tracing::field::Empty))]
    pub async fn service_client(&self, service: &str, region: &str) -> Result<ServiceClient> {
        let entry = *self
            .catalog
            .get(service)
            .ok_or_else(|| ClientError::UnknownService { service: service.to_owned() })?;
        let region = self.region(Some(region));

        let base = if entry.admin {
            self.credentials.domain_client()
        } else {
            self.credentials.project_client()
        };
        base.refresh_credentials().await.map_err(|source| ClientError::Auth {
            service: service.to_owned(),
            region: region.to_owned(),
            source,
        })?;

        if let Some(endpoint) = self.custom_endpoint(service) {
            let project_id = base.project_id().or(self.credentials.project_id());
            let resource_base = entry.resource_base_url(endpoint, project_id);
            return Ok(self.finish(service, base.clone(), endpoint.to_owned(), resource_base));
        }

        if !entry.is_complete() {
            return Err(ClientError::IncompleteCatalog { service: service.to_owned() });
        }

        let provider_region = self.config().provider_region();
        if region != provider_region && !base.is_aksk() {
            return Err(ClientError::ForeignRegion {
                region: region.to_owned(),
                provider_region: provider_region.to_owned(),
            });
        }

        let project_id = self.lookup_project(region).await?;
        let endpoint = service_host(&entry, region, self.config());
        let resource_base = entry.resource_base_url(&endpoint, Some(&project_id));
        let client = base.with_project(project_id, region);
        Ok(self.finish(service, client, endpoint, resource_base))
    }

    fn finish(
        &self,
        service: &str,
        client: AuthenticatedClient,
        endpoint: String,
        resource_base: String,
    ) -> ServiceClient {
        tracing::Span::current().record("endpoint", endpoint.as_str());
        tracing::debug!(service, region = client.region(), %resource_base, "service client built");
        ServiceClient { service: service.to_owned(), client, endpoint, resource_base }
    }
}

/// Copies each custom endpoint onto the keys derived from its service.
///
/// An endpoint set explicitly for a derived key is kept.
fn expand_endpoints(catalog: &ServiceCatalog, config: &ProviderConfig) -> HashMap<String, String> {
    let explicit = config.endpoints();
    let mut endpoints: HashMap<String, String> =
        explicit.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    for (service, endpoint) in explicit {
        for derived in catalog.derived_keys(service) {
            if !explicit.contains_key(derived) {
                endpoints.insert(derived.clone(), endpoint.clone());
            }
        }
    }
    endpoints
}

/// `https://{name}.{region}.{cloud}/`, without the region for global
/// services unless the provider pins regions.
fn service_host(entry: &CatalogEntry, region: &str, config: &ProviderConfig) -> String {
    if entry.global && !config.region_client() {
        format!("https://{}.{}/", entry.name, config.cloud())
    } else {
        format!("https://{}.{}.{}/", entry.name, region, config.cloud())
    }
}
