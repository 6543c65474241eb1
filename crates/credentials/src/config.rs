//! Provider configuration.
//!
//! [`ProviderConfig`] is everything a provider needs before it can
//! authenticate: credential material, identity endpoint, region and domain
//! identifiers, assume-role targets, retry and TLS options, and the custom
//! per-service endpoint overrides.
//!
//! It can be built three ways:
//!
//! - [`ProviderConfig::builder`], which normalizes and validates
//! - [`ProviderConfig::from_env`], reading the `HW_*` variables
//! - `serde` deserialization, followed by [`ProviderConfig::normalized`]
//!
//! Defaults that depend on other fields (cloud domain, identity endpoint,
//! project name) are computed by the accessors, so a region read late from
//! the shared credentials file still yields the right values.

use std::{collections::BTreeMap, env};

use hwcloud_transport::{
    RetryConfig, TlsConfig, TransportConfig,
    config::{https_proxy_from, no_proxy_from},
};
use serde::Deserialize;

use crate::{
    credentials::Secret,
    error::{AuthError, Result},
};

/// Default cloud domain.
pub const DEFAULT_CLOUD: &str = "myhuaweicloud.com";

/// Cloud domain for European regions.
pub const EUROPE_CLOUD: &str = "myhuaweicloud.eu";

/// Regions with this prefix are served from [`EUROPE_CLOUD`].
pub const EUROPE_REGION_PREFIX: &str = "eu-west-1";

/// Default instance metadata endpoint for temporary security keys.
pub const DEFAULT_METADATA_ENDPOINT: &str = "http://169.254.169.254/openstack/latest/securitykey";

/// Default number of retries.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Shared credentials file used when only a profile name is configured.
pub const DEFAULT_SHARED_CONFIG_FILE: &str = "~/.hcloud/config.json";

/// Provider-level configuration.
///
/// # Example
///
/// ```
/// use hwcloud_credentials::ProviderConfig;
///
/// let config = ProviderConfig::builder()
///     .region("eu-west-101")
///     .access_key("AK")
///     .secret_key("SK")
///     .build()?;
///
/// assert_eq!(config.cloud(), "myhuaweicloud.eu");
/// assert_eq!(config.identity_endpoint(), "https://iam.eu-west-101.myhuaweicloud.eu/v3");
/// assert!(config.region_client());
/// # Ok::<(), hwcloud_credentials::AuthError>(())
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    pub(crate) region: String,
    pub(crate) access_key: Option<String>,
    pub(crate) secret_key: Option<Secret>,
    pub(crate) security_token: Option<Secret>,
    pub(crate) token: Option<Secret>,
    pub(crate) user_name: Option<String>,
    pub(crate) user_id: Option<String>,
    pub(crate) password: Option<Secret>,
    pub(crate) domain_id: Option<String>,
    pub(crate) domain_name: Option<String>,
    pub(crate) project_id: Option<String>,
    pub(crate) project_name: Option<String>,
    /// Agency delegation for token and password modes.
    pub(crate) agency_name: Option<String>,
    pub(crate) agency_domain_name: Option<String>,
    pub(crate) delegated_project: Option<String>,
    /// STS exchange target for AK/SK-based credentials.
    pub(crate) assume_role_agency: Option<String>,
    pub(crate) assume_role_domain: Option<String>,
    pub(crate) assume_role_domain_id: Option<String>,
    pub(crate) assume_role_duration: Option<u32>,
    /// Agencies assumed one after another; each signs the next exchange.
    pub(crate) assume_role_list: Vec<AssumeRole>,
    /// Identity-provider federation.
    pub(crate) assume_role_idp_id: Option<String>,
    pub(crate) assume_role_id_token: Option<Secret>,
    pub(crate) identity_endpoint: Option<String>,
    pub(crate) cloud: Option<String>,
    pub(crate) region_client: bool,
    pub(crate) shared_config_file: Option<String>,
    pub(crate) profile: Option<String>,
    pub(crate) max_retries: u32,
    pub(crate) retry: Option<RetryConfig>,
    pub(crate) tls: TlsConfig,
    pub(crate) endpoints: BTreeMap<String, String>,
    pub(crate) enterprise_project_id: Option<String>,
    pub(crate) user_agent: Option<String>,
    pub(crate) metadata_endpoint: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            region: String::new(),
            access_key: None,
            secret_key: None,
            security_token: None,
            token: None,
            user_name: None,
            user_id: None,
            password: None,
            domain_id: None,
            domain_name: None,
            project_id: None,
            project_name: None,
            agency_name: None,
            agency_domain_name: None,
            delegated_project: None,
            assume_role_agency: None,
            assume_role_domain: None,
            assume_role_domain_id: None,
            assume_role_duration: None,
            assume_role_list: Vec::new(),
            assume_role_idp_id: None,
            assume_role_id_token: None,
            identity_endpoint: None,
            cloud: None,
            region_client: false,
            shared_config_file: None,
            profile: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry: None,
            tls: TlsConfig::default(),
            endpoints: BTreeMap::new(),
            enterprise_project_id: None,
            user_agent: None,
            metadata_endpoint: DEFAULT_METADATA_ENDPOINT.to_owned(),
        }
    }
}

#[bon::bon]
impl ProviderConfig {
    /// Creates a provider configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if:
    /// - a custom endpoint is blank
    /// - no region is given and no shared credentials file could supply one
    #[builder]
    pub fn new(
        #[builder(into, default)] region: String,
        #[builder(into)] access_key: Option<String>,
        #[builder(into)] secret_key: Option<Secret>,
        #[builder(into)] security_token: Option<Secret>,
        #[builder(into)] token: Option<Secret>,
        #[builder(into)] user_name: Option<String>,
        #[builder(into)] user_id: Option<String>,
        #[builder(into)] password: Option<Secret>,
        #[builder(into)] domain_id: Option<String>,
        #[builder(into)] domain_name: Option<String>,
        #[builder(into)] project_id: Option<String>,
        #[builder(into)] project_name: Option<String>,
        #[builder(into)] agency_name: Option<String>,
        #[builder(into)] agency_domain_name: Option<String>,
        #[builder(into)] delegated_project: Option<String>,
        #[builder(into)] assume_role_agency: Option<String>,
        #[builder(into)] assume_role_domain: Option<String>,
        #[builder(into)] assume_role_domain_id: Option<String>,
        assume_role_duration: Option<u32>,
        #[builder(default)] assume_role_list: Vec<AssumeRole>,
        #[builder(into)] assume_role_idp_id: Option<String>,
        #[builder(into)] assume_role_id_token: Option<Secret>,
        #[builder(into)] identity_endpoint: Option<String>,
        #[builder(into)] cloud: Option<String>,
        #[builder(default)] region_client: bool,
        #[builder(into)] shared_config_file: Option<String>,
        #[builder(into)] profile: Option<String>,
        #[builder(default = DEFAULT_MAX_RETRIES)] max_retries: u32,
        retry: Option<RetryConfig>,
        #[builder(default)] tls: TlsConfig,
        #[builder(default)] endpoints: BTreeMap<String, String>,
        #[builder(into)] enterprise_project_id: Option<String>,
        #[builder(into)] user_agent: Option<String>,
        #[builder(into, default = DEFAULT_METADATA_ENDPOINT.to_owned())] metadata_endpoint: String,
    ) -> Result<Self> {
        Self {
            region,
            access_key,
            secret_key,
            security_token,
            token,
            user_name,
            user_id,
            password,
            domain_id,
            domain_name,
            project_id,
            project_name,
            agency_name,
            agency_domain_name,
            delegated_project,
            assume_role_agency,
            assume_role_domain,
            assume_role_domain_id,
            assume_role_duration,
            assume_role_list,
            assume_role_idp_id,
            assume_role_id_token,
            identity_endpoint,
            cloud,
            region_client,
            shared_config_file,
            profile,
            max_retries,
            retry,
            tls,
            endpoints,
            enterprise_project_id,
            user_agent,
            metadata_endpoint,
        }
        .normalized()
    }

    /// Loads configuration from the `HW_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if a variable cannot be parsed or the
    /// result fails validation.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which maps a variable name to
    /// its value.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if a variable cannot be parsed or the
    /// result fails validation.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
        let secret = |key: &str| var(key).map(Secret::new);

        let assume_role_duration = match var("HW_ASSUME_ROLE_DURATION") {
            Some(raw) => Some(raw.parse().map_err(|_| {
                AuthError::Config(format!("HW_ASSUME_ROLE_DURATION must be seconds, got {raw:?}"))
            })?),
            None => None,
        };
        let max_retries = match var("HW_MAX_RETRIES") {
            Some(raw) => parse_max_retries(&raw)?,
            None => DEFAULT_MAX_RETRIES,
        };
        let insecure = match var("HW_INSECURE") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                AuthError::Config(format!("HW_INSECURE must be a boolean, got {raw:?}"))
            })?,
            None => false,
        };

        let config = Self {
            region: var("HW_REGION_NAME").unwrap_or_default(),
            access_key: var("HW_ACCESS_KEY"),
            secret_key: secret("HW_SECRET_KEY"),
            security_token: secret("HW_SECURITY_TOKEN"),
            token: secret("HW_AUTH_TOKEN"),
            user_name: var("HW_USER_NAME"),
            user_id: var("HW_USER_ID"),
            password: secret("HW_USER_PASSWORD"),
            domain_id: var("HW_DOMAIN_ID"),
            domain_name: var("HW_DOMAIN_NAME"),
            project_id: var("HW_PROJECT_ID"),
            project_name: var("HW_PROJECT_NAME"),
            assume_role_agency: var("HW_ASSUME_ROLE_AGENCY_NAME"),
            assume_role_domain: var("HW_ASSUME_ROLE_DOMAIN_NAME"),
            assume_role_domain_id: var("HW_ASSUME_ROLE_DOMAIN_ID"),
            assume_role_duration,
            assume_role_idp_id: var("HW_ASSUME_ROLE_IDP_ID"),
            assume_role_id_token: secret("HW_ASSUME_ROLE_ID_TOKEN"),
            identity_endpoint: var("HW_AUTH_URL"),
            cloud: var("HW_CLOUD"),
            shared_config_file: var("HW_SHARED_CONFIG_FILE"),
            profile: var("HW_PROFILE"),
            max_retries,
            tls: TlsConfig {
                insecure,
                ca_cert: var("HW_CACERT_FILE"),
                client_cert: var("HW_CERT_FILE"),
                client_key: var("HW_KEY_FILE"),
            },
            enterprise_project_id: var("HW_ENTERPRISE_PROJECT_ID"),
            user_agent: var("HW_TF_CUSTOM_UA"),
            ..Self::default()
        };
        config.normalized()
    }

    /// Normalizes endpoint overrides and validates the configuration.
    ///
    /// Idempotent: normalizing twice yields the same value.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if a custom endpoint is blank, or if no
    /// region is set and no shared credentials file is configured to supply
    /// one.
    pub fn normalized(mut self) -> Result<Self> {
        self.region = self.region.trim().to_owned();
        if self.region.is_empty() && !self.uses_shared_config() {
            return Err(AuthError::Config("region should be provided".into()));
        }

        let mut endpoints = BTreeMap::new();
        for (service, endpoint) in std::mem::take(&mut self.endpoints) {
            let endpoint = normalize_endpoint(&service, &endpoint)?;
            endpoints.insert(service, endpoint);
        }
        self.endpoints = endpoints;

        if !self.region.is_empty() && self.cloud() == EUROPE_CLOUD {
            let cdn = format!("https://cdn.{EUROPE_CLOUD}/");
            self.endpoints.entry("cdn".to_owned()).or_insert(cdn);
        }

        if let Some(path) = self.shared_config_file.take() {
            self.shared_config_file = Some(expand_home(&path));
        }
        Ok(self)
    }

    /// Returns the provider region.
    #[must_use]
    pub fn provider_region(&self) -> &str {
        &self.region
    }

    /// Returns `explicit` if non-empty, otherwise the provider region.
    #[must_use]
    pub fn region<'a>(&'a self, explicit: Option<&'a str>) -> &'a str {
        explicit.filter(|r| !r.is_empty()).unwrap_or(&self.region)
    }

    /// Returns `explicit` if non-empty, otherwise the provider-level
    /// enterprise project ID.
    #[must_use]
    pub fn enterprise_project_id<'a>(&'a self, explicit: Option<&'a str>) -> Option<&'a str> {
        explicit
            .filter(|id| !id.is_empty())
            .or(self.enterprise_project_id.as_deref())
    }

    /// Returns the cloud domain.
    #[must_use]
    pub fn cloud(&self) -> &str {
        match self.cloud.as_deref().filter(|c| !c.is_empty()) {
            Some(cloud) => cloud,
            None if self.is_europe_region() => EUROPE_CLOUD,
            None => DEFAULT_CLOUD,
        }
    }

    /// Returns `true` if global services must still carry the region in
    /// their host name. Always on for European regions.
    #[must_use]
    pub fn region_client(&self) -> bool {
        self.region_client || self.is_europe_region()
    }

    /// Returns the identity service endpoint, without a trailing slash.
    #[must_use]
    pub fn identity_endpoint(&self) -> String {
        match self.identity_endpoint.as_deref().filter(|e| !e.is_empty()) {
            Some(endpoint) => endpoint.trim_end_matches('/').to_owned(),
            None => format!("https://iam.{}.{}/v3", self.region, self.cloud()),
        }
    }

    /// Returns the project name; defaults to the region.
    #[must_use]
    pub fn project_name(&self) -> &str {
        self.project_name.as_deref().filter(|n| !n.is_empty()).unwrap_or(&self.region)
    }

    /// Returns the configured project ID.
    #[must_use]
    pub fn project_id(&self) -> Option<&str> {
        non_empty(self.project_id.as_deref())
    }

    /// Returns the delegated project for agency scoping; defaults to the
    /// region.
    #[must_use]
    pub fn delegated_project(&self) -> &str {
        self.delegated_project.as_deref().filter(|p| !p.is_empty()).unwrap_or(&self.region)
    }

    /// Returns the configured domain ID.
    #[must_use]
    pub fn domain_id(&self) -> Option<&str> {
        non_empty(self.domain_id.as_deref())
    }

    /// Returns the configured domain name.
    #[must_use]
    pub fn domain_name(&self) -> Option<&str> {
        non_empty(self.domain_name.as_deref())
    }

    /// Returns the agency delegation, when both names are set.
    #[must_use]
    pub fn agency(&self) -> Option<(&str, &str)> {
        non_empty(self.agency_name.as_deref()).zip(non_empty(self.agency_domain_name.as_deref()))
    }

    /// Returns `true` if either agency delegation name is set.
    pub(crate) fn names_agency(&self) -> bool {
        non_empty(self.agency_name.as_deref()).is_some()
            || non_empty(self.agency_domain_name.as_deref()).is_some()
    }

    /// Returns the agencies to assume, in order.
    ///
    /// A single `assume_role_agency` yields one entry; its domain name falls
    /// back to the configured domain name. Otherwise `assume_role_list` is
    /// used as given.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if both forms are set, or if an entry
    /// names neither a domain nor a domain ID.
    pub fn assume_roles(&self) -> Result<Vec<AssumeRole>> {
        let roles = match non_empty(self.assume_role_agency.as_deref()) {
            Some(_) if !self.assume_role_list.is_empty() => {
                return Err(AuthError::Config(
                    "assume_role_agency and assume_role_list are mutually exclusive".into(),
                ));
            },
            Some(agency) => vec![AssumeRole {
                agency_name: agency.to_owned(),
                domain_name: non_empty(self.assume_role_domain.as_deref())
                    .or(self.domain_name())
                    .map(str::to_owned),
                domain_id: non_empty(self.assume_role_domain_id.as_deref()).map(str::to_owned),
                duration_seconds: self.assume_role_duration.filter(|d| *d > 0),
            }],
            None => self.assume_role_list.clone(),
        };
        for role in &roles {
            if role.agency_name.is_empty() {
                return Err(AuthError::Config("assume role entry has no agency name".into()));
            }
            if role.domain_id().is_none() && role.domain_name().is_none() {
                return Err(AuthError::Config(format!(
                    "assume role {} needs a domain name or a domain ID",
                    role.agency_name
                )));
            }
        }
        Ok(roles)
    }

    /// Returns the identity provider ID and ID token, when both are set.
    #[must_use]
    pub fn federation(&self) -> Option<(&str, &Secret)> {
        let idp = non_empty(self.assume_role_idp_id.as_deref())?;
        let token = self.assume_role_id_token.as_ref().filter(|t| !t.is_empty())?;
        Some((idp, token))
    }

    /// Returns the view of this configuration that authenticates as the
    /// account owning `role`.
    ///
    /// The base account's domain and project identifiers are dropped, so the
    /// agency account's domain and project are discovered instead. A v5
    /// agency's domain ID is already known and is kept.
    #[must_use]
    pub(crate) fn for_agency(&self, role: &AssumeRole) -> Self {
        Self {
            domain_id: role.domain_id().map(str::to_owned),
            domain_name: None,
            project_id: None,
            ..self.clone()
        }
    }

    /// Returns the security token service endpoint, ending with `/`.
    #[must_use]
    pub fn sts_endpoint(&self) -> String {
        match self.endpoints.get("sts") {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://sts.{}.{}/", self.region, self.cloud()),
        }
    }

    /// Returns the normalized custom endpoint overrides.
    #[must_use]
    pub fn endpoints(&self) -> &BTreeMap<String, String> {
        &self.endpoints
    }

    /// Returns the retry budget.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the instance metadata endpoint.
    #[must_use]
    pub fn metadata_endpoint(&self) -> &str {
        &self.metadata_endpoint
    }

    /// Returns `true` if a shared credentials file or profile is configured.
    #[must_use]
    pub fn uses_shared_config(&self) -> bool {
        non_empty(self.shared_config_file.as_deref()).is_some()
            || non_empty(self.profile.as_deref()).is_some()
    }

    /// Builds the transport settings: TLS, user agent, proxy and proxy
    /// bypass from the environment, and the retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] if the retry policy is invalid.
    pub fn transport_config(&self) -> Result<TransportConfig> {
        let retry = match &self.retry {
            Some(retry) => retry.clone(),
            None => RetryConfig::builder().max_retries(self.max_retries).build()?,
        };
        Ok(TransportConfig::builder()
            .retry(retry)
            .tls(self.tls.clone())
            .maybe_https_proxy(https_proxy_from(|key| env::var(key).ok()))
            .maybe_no_proxy(no_proxy_from(|key| env::var(key).ok()))
            .maybe_user_agent_prefix(self.user_agent.clone())
            .build())
    }

    fn is_europe_region(&self) -> bool {
        self.region.starts_with(EUROPE_REGION_PREFIX)
    }
}

/// One agency to assume.
///
/// Entries with a domain ID use the IAM v5 `agencies/assume` call; the
/// others use the v3 security-token exchange by domain name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssumeRole {
    pub(crate) agency_name: String,
    #[serde(default)]
    pub(crate) domain_name: Option<String>,
    #[serde(default)]
    pub(crate) domain_id: Option<String>,
    #[serde(default)]
    pub(crate) duration_seconds: Option<u32>,
}

#[bon::bon]
impl AssumeRole {
    /// Creates an entry.
    #[builder]
    pub fn new(
        #[builder(into)] agency_name: String,
        #[builder(into)] domain_name: Option<String>,
        #[builder(into)] domain_id: Option<String>,
        duration_seconds: Option<u32>,
    ) -> Self {
        Self { agency_name, domain_name, domain_id, duration_seconds }
    }
}

impl AssumeRole {
    /// Returns the agency name.
    #[must_use]
    pub fn agency_name(&self) -> &str {
        &self.agency_name
    }

    /// Returns the name of the domain owning the agency.
    #[must_use]
    pub fn domain_name(&self) -> Option<&str> {
        non_empty(self.domain_name.as_deref())
    }

    /// Returns the ID of the domain owning the agency.
    #[must_use]
    pub fn domain_id(&self) -> Option<&str> {
        non_empty(self.domain_id.as_deref())
    }

    /// Returns the requested credential lifetime, if any.
    #[must_use]
    pub fn duration_seconds(&self) -> Option<u32> {
        self.duration_seconds.filter(|d| *d > 0)
    }

    /// Returns `true` if the entry is assumed through IAM v5.
    #[must_use]
    pub fn uses_v5(&self) -> bool {
        self.domain_id().is_some()
    }

    /// Returns the domain the entry is reported under: the ID for v5, the
    /// name otherwise.
    #[must_use]
    pub fn target(&self) -> &str {
        self.domain_id().or(self.domain_name()).unwrap_or_default()
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Trims `endpoint`, adds `https://` when it has no scheme and a trailing
/// slash when it lacks one.
fn normalize_endpoint(service: &str, endpoint: &str) -> Result<String> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(AuthError::Config(format!(
            "the value of custom endpoint {service} must be specified"
        )));
    }
    let mut normalized = if endpoint.starts_with("http") {
        endpoint.to_owned()
    } else {
        format!("https://{endpoint}")
    };
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Ok(normalized)
}

pub(crate) fn expand_home(path: &str) -> String {
    let Some(rest) = path.strip_prefix('~') else {
        return path.to_owned();
    };
    let home = env::var("HOME").or_else(|_| env::var("USERPROFILE"));
    match home {
        Ok(home) if rest.is_empty() || rest.starts_with('/') => format!("{home}{rest}"),
        _ => path.to_owned(),
    }
}

fn parse_max_retries(raw: &str) -> Result<u32> {
    let value: i64 = raw
        .parse()
        .map_err(|_| AuthError::Config(format!("HW_MAX_RETRIES must be an integer, got {raw:?}")))?;
    u32::try_from(value)
        .map_err(|_| AuthError::Config("max_retries should be a positive value".into()))
}

/// Parses a boolean flag.
///
/// Accepts `true`/`false`, `1`/`0` and `yes`/`no`, case-insensitively.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_follow_region() {
        let config = ProviderConfig::builder().region("cn-north-4").build().unwrap();
        assert_eq!(config.cloud(), DEFAULT_CLOUD);
        assert_eq!(config.identity_endpoint(), "https://iam.cn-north-4.myhuaweicloud.com/v3");
        assert_eq!(config.project_name(), "cn-north-4");
        assert_eq!(config.delegated_project(), "cn-north-4");
        assert_eq!(config.max_retries(), DEFAULT_MAX_RETRIES);
        assert_eq!(config.metadata_endpoint(), DEFAULT_METADATA_ENDPOINT);
        assert!(!config.region_client());
    }

    #[test]
    fn test_europe_region_switches_cloud_and_pins_region() {
        let config = ProviderConfig::builder().region("eu-west-101").build().unwrap();
        assert_eq!(config.cloud(), EUROPE_CLOUD);
        assert!(config.region_client());
        assert_eq!(config.endpoints().get("cdn").unwrap(), "https://cdn.myhuaweicloud.eu/");
    }

    #[test]
    fn test_explicit_cloud_wins() {
        let config = ProviderConfig::builder()
            .region("eu-west-101")
            .cloud("example.cloud")
            .build()
            .unwrap();
        assert_eq!(config.cloud(), "example.cloud");
        assert!(!config.endpoints().contains_key("cdn"));
    }

    #[test]
    fn test_region_required_without_shared_file() {
        let err = ProviderConfig::builder().access_key("AK").build().unwrap_err();
        assert!(matches!(err, AuthError::Config(msg) if msg.contains("region")));

        let config = ProviderConfig::builder().profile("dev").build().unwrap();
        assert!(config.uses_shared_config());
    }

    #[test]
    fn test_endpoint_normalization_is_idempotent() {
        let endpoints = BTreeMap::from([
            ("ecs".to_owned(), "  ecs.example.com ".to_owned()),
            ("vpc".to_owned(), "http://vpc.local".to_owned()),
            ("obs".to_owned(), "https://obs.example.com/".to_owned()),
        ]);
        let config =
            ProviderConfig::builder().region("r1").endpoints(endpoints).build().unwrap();
        assert_eq!(config.endpoints()["ecs"], "https://ecs.example.com/");
        assert_eq!(config.endpoints()["vpc"], "http://vpc.local/");
        assert_eq!(config.endpoints()["obs"], "https://obs.example.com/");

        let again = config.clone().normalized().unwrap();
        assert_eq!(again.endpoints(), config.endpoints());
    }

    #[test]
    fn test_blank_endpoint_rejected() {
        let endpoints = BTreeMap::from([("ecs".to_owned(), "   ".to_owned())]);
        let err = ProviderConfig::builder().region("r1").endpoints(endpoints).build().unwrap_err();
        assert!(err.to_string().contains("ecs"));
    }

    #[test]
    fn test_from_lookup_reads_hw_variables() {
        let config = ProviderConfig::from_lookup(lookup(&[
            ("HW_REGION_NAME", "cn-south-1"),
            ("HW_ACCESS_KEY", "AK"),
            ("HW_SECRET_KEY", "SK"),
            ("HW_DOMAIN_NAME", "acme"),
            ("HW_MAX_RETRIES", "2"),
            ("HW_INSECURE", "yes"),
            ("HW_AUTH_URL", "https://iam.internal/v3/"),
            ("HW_ENTERPRISE_PROJECT_ID", "eps-1"),
        ]))
        .unwrap();

        assert_eq!(config.provider_region(), "cn-south-1");
        assert_eq!(config.access_key.as_deref(), Some("AK"));
        assert_eq!(config.domain_name(), Some("acme"));
        assert_eq!(config.max_retries(), 2);
        assert!(config.tls.insecure);
        assert_eq!(config.identity_endpoint(), "https://iam.internal/v3");
        assert_eq!(config.enterprise_project_id(None), Some("eps-1"));
        assert_eq!(config.enterprise_project_id(Some("eps-2")), Some("eps-2"));
        assert_eq!(config.enterprise_project_id(Some("")), Some("eps-1"));
    }

    #[test]
    fn test_from_lookup_rejects_negative_retries() {
        let err = ProviderConfig::from_lookup(lookup(&[
            ("HW_REGION_NAME", "r1"),
            ("HW_MAX_RETRIES", "-1"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("positive"));

        let err = ProviderConfig::from_lookup(lookup(&[
            ("HW_REGION_NAME", "r1"),
            ("HW_MAX_RETRIES", "many"),
        ]))
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_from_lookup_ignores_blank_values() {
        let config = ProviderConfig::from_lookup(lookup(&[
            ("HW_REGION_NAME", "r1"),
            ("HW_ACCESS_KEY", "   "),
        ]))
        .unwrap();
        assert_eq!(config.access_key, None);
    }

    #[test]
    fn test_region_fallback() {
        let config = ProviderConfig::builder().region("r1").build().unwrap();
        assert_eq!(config.region(None), "r1");
        assert_eq!(config.region(Some("")), "r1");
        assert_eq!(config.region(Some("r2")), "r2");
    }

    #[test]
    fn test_assume_role_domain_falls_back_to_domain_name() {
        let config = ProviderConfig::builder()
            .region("r1")
            .domain_name("acme")
            .assume_role_agency("ops")
            .build()
            .unwrap();
        let roles = config.assume_roles().unwrap();
        assert_eq!(roles, vec![AssumeRole::builder().agency_name("ops").domain_name("acme").build()]);
        assert!(!roles[0].uses_v5());

        let config = ProviderConfig::builder().region("r1").build().unwrap();
        assert!(config.assume_roles().unwrap().is_empty());
    }

    #[test]
    fn test_assume_role_with_domain_id_uses_v5() {
        let config = ProviderConfig::builder()
            .region("r1")
            .assume_role_agency("ops")
            .assume_role_domain_id("d-target")
            .assume_role_duration(3600)
            .build()
            .unwrap();
        let roles = config.assume_roles().unwrap();
        assert!(roles[0].uses_v5());
        assert_eq!(roles[0].target(), "d-target");
        assert_eq!(roles[0].duration_seconds(), Some(3600));
    }

    #[test]
    fn test_assume_role_list_validation() {
        let list = vec![
            AssumeRole::builder().agency_name("first").domain_name("a").build(),
            AssumeRole::builder().agency_name("second").build(),
        ];
        let config =
            ProviderConfig::builder().region("r1").assume_role_list(list.clone()).build().unwrap();
        let err = config.assume_roles().unwrap_err();
        assert!(err.to_string().contains("second"));

        let config = ProviderConfig::builder()
            .region("r1")
            .assume_role_agency("ops")
            .assume_role_domain("a")
            .assume_role_list(list[..1].to_vec())
            .build()
            .unwrap();
        assert!(config.assume_roles().unwrap_err().is_configuration());
    }

    #[test]
    fn test_agency_view_drops_base_identifiers() {
        let config = ProviderConfig::builder()
            .region("r1")
            .domain_name("acme")
            .domain_id("d-base")
            .project_id("p-base")
            .build()
            .unwrap();
        let role = AssumeRole::builder().agency_name("ops").domain_name("target").build();
        let view = config.for_agency(&role);
        assert_eq!(view.domain_name(), None);
        assert_eq!(view.domain_id(), None);
        assert_eq!(view.project_id(), None);
        assert_eq!(view.provider_region(), "r1");

        let role = AssumeRole::builder().agency_name("ops").domain_id("d-target").build();
        assert_eq!(config.for_agency(&role).domain_id(), Some("d-target"));
    }

    #[test]
    fn test_federation_needs_both_values() {
        let config = ProviderConfig::builder().region("r1").assume_role_idp_id("idp").build().unwrap();
        assert!(config.federation().is_none());

        let config = ProviderConfig::builder()
            .region("r1")
            .assume_role_idp_id("idp")
            .assume_role_id_token("eyJ")
            .build()
            .unwrap();
        let (idp, token) = config.federation().unwrap();
        assert_eq!(idp, "idp");
        assert_eq!(token.expose(), "eyJ");
    }

    #[test]
    fn test_sts_endpoint_default_and_override() {
        let config = ProviderConfig::builder().region("r1").build().unwrap();
        assert_eq!(config.sts_endpoint(), "https://sts.r1.myhuaweicloud.com/");

        let endpoints = BTreeMap::from([("sts".to_owned(), "sts.internal".to_owned())]);
        let config = ProviderConfig::builder().region("r1").endpoints(endpoints).build().unwrap();
        assert_eq!(config.sts_endpoint(), "https://sts.internal/");
    }

    #[test]
    fn test_from_lookup_reads_assume_role_variables() {
        let config = ProviderConfig::from_lookup(lookup(&[
            ("HW_REGION_NAME", "r1"),
            ("HW_ASSUME_ROLE_AGENCY_NAME", "ops"),
            ("HW_ASSUME_ROLE_DOMAIN_ID", "d-target"),
            ("HW_ASSUME_ROLE_DURATION", "900"),
            ("HW_ASSUME_ROLE_IDP_ID", "idp"),
            ("HW_ASSUME_ROLE_ID_TOKEN", "eyJ"),
        ]))
        .unwrap();
        assert_eq!(config.assume_roles().unwrap()[0].duration_seconds(), Some(900));
        assert!(config.federation().is_some());

        let err = ProviderConfig::from_lookup(lookup(&[
            ("HW_REGION_NAME", "r1"),
            ("HW_ASSUME_ROLE_DURATION", "an hour"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("HW_ASSUME_ROLE_DURATION"));
    }

    #[test]
    fn test_agency_requires_both_names() {
        let config =
            ProviderConfig::builder().region("r1").agency_name("ops").build().unwrap();
        assert_eq!(config.agency(), None);
    }

    #[test]
    fn test_deserializes_with_defaults() {
        let config: ProviderConfig = serde_json::from_str(
            r#"{"region": "r1", "access_key": "AK", "secret_key": "SK", "endpoints": {"ecs": "ecs.local"}}"#,
        )
        .unwrap();
        let config = config.normalized().unwrap();
        assert_eq!(config.max_retries(), DEFAULT_MAX_RETRIES);
        assert_eq!(config.endpoints()["ecs"], "https://ecs.local/");
        assert!(!format!("{config:?}").contains("\"SK\""));
    }

    #[test]
    fn test_parse_bool_variants() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("No"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn test_expand_home_leaves_other_paths() {
        assert_eq!(expand_home("/etc/hcloud.json"), "/etc/hcloud.json");
        assert_eq!(expand_home("~user/x"), "~user/x");
    }

    #[test]
    fn test_transport_config_uses_max_retries() {
        let config =
            ProviderConfig::builder().region("r1").max_retries(0).user_agent("tool/1").build().unwrap();
        let transport = config.transport_config().unwrap();
        assert_eq!(transport.retry.max_retries(), 0);
        assert!(transport.user_agent().starts_with("tool/1 "));
    }
}
