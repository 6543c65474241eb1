//! Shared credentials file.
//!
//! The command-line tooling keeps named profiles in a JSON document,
//! `~/.hcloud/config.json` by default:
//!
//! ```json
//! {
//!   "current": "dev",
//!   "profiles": [
//!     {"name": "dev", "mode": "AKSK", "accessKeyId": "...", "secretAccessKey": "...",
//!      "region": "cn-north-4", "projectId": "...", "domainId": "..."}
//!   ]
//! }
//! ```
//!
//! A profile in `SSO` mode carries its keys under `ssoAuth.stsToken`.

use std::path::Path;

use serde::Deserialize;

use crate::{
    config::{DEFAULT_SHARED_CONFIG_FILE, ProviderConfig, expand_home, non_empty},
    credentials::Secret,
    error::{AuthError, Result},
};

/// The shared credentials document.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedConfig {
    /// Name of the profile used when none is configured.
    #[serde(default)]
    pub current: String,
    /// All profiles.
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

/// One named profile.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(missing_docs)]
pub struct Profile {
    pub name: String,
    pub mode: String,
    pub access_key_id: String,
    pub secret_access_key: Secret,
    pub security_token: Secret,
    pub region: String,
    pub project_id: String,
    pub domain_id: String,
    pub agency_domain_id: String,
    pub agency_domain_name: String,
    pub agency_name: String,
    pub sso_auth: Option<SsoAuth>,
}

/// Single sign-on block of an `SSO` profile.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SsoAuth {
    /// Temporary keys issued by the sign-on.
    pub sts_token: Option<StsToken>,
}

/// Temporary keys of an `SSO` profile.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(missing_docs)]
pub struct StsToken {
    pub access_key_id: String,
    pub secret_access_key: Secret,
    pub security_token: Secret,
}

impl SharedConfig {
    /// Reads and parses the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SharedConfig`] if the file is missing,
    /// unreadable or not valid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let display = path.display().to_string();
        if !path.exists() {
            return Err(AuthError::shared_config(display, "the shared config file does not exist"));
        }
        let data = std::fs::read(path).map_err(|e| {
            AuthError::shared_config_with_source(&display, "cannot read the shared config file", e)
        })?;
        serde_json::from_slice(&data).map_err(|e| {
            AuthError::shared_config_with_source(&display, "invalid shared config JSON", e)
        })
    }

    /// Returns the profile named `name`, or the `current` profile.
    #[must_use]
    pub fn profile(&self, name: Option<&str>) -> Option<&Profile> {
        let wanted = non_empty(name).unwrap_or(&self.current);
        self.profiles.iter().find(|p| p.name == wanted)
    }
}

/// Copies credentials and optional identifiers from the selected profile
/// into `config`.
///
/// Access key, secret key and security token always come from the profile.
/// Region, domain ID, project ID and the assume-role agency (by domain
/// name or domain ID) are copied only when the profile sets them.
///
/// # Errors
///
/// - [`AuthError::SharedConfig`] if the file cannot be loaded, or an `SSO`
///   profile lacks its token block
/// - [`AuthError::ProfileNotFound`] if no profile matches
pub fn apply(mut config: ProviderConfig) -> Result<ProviderConfig> {
    let path = non_empty(config.shared_config_file.as_deref())
        .unwrap_or(DEFAULT_SHARED_CONFIG_FILE)
        .to_owned();
    let config_path = expand_home(&path);
    let document = SharedConfig::load(Path::new(&config_path))?;

    let Some(profile) = document.profile(config.profile.as_deref()) else {
        let profile = non_empty(config.profile.as_deref()).unwrap_or(&document.current);
        return Err(AuthError::ProfileNotFound { profile: profile.to_owned(), path: config_path });
    };

    if profile.mode.eq_ignore_ascii_case("SSO") {
        let sts = profile
            .sso_auth
            .as_ref()
            .ok_or_else(|| {
                AuthError::shared_config(&config_path, "missing ssoAuth when auth mode is SSO")
            })?
            .sts_token
            .as_ref()
            .ok_or_else(|| {
                AuthError::shared_config(&config_path, "missing ssoAuth.stsToken when auth mode is SSO")
            })?;
        set_keys(&mut config, &sts.access_key_id, &sts.secret_access_key, &sts.security_token);
    } else {
        set_keys(
            &mut config,
            &profile.access_key_id,
            &profile.secret_access_key,
            &profile.security_token,
        );
    }

    if !profile.region.is_empty() {
        config.region = profile.region.clone();
    }
    if !profile.domain_id.is_empty() {
        config.domain_id = Some(profile.domain_id.clone());
    }
    if !profile.project_id.is_empty() {
        config.project_id = Some(profile.project_id.clone());
    }
    if !profile.agency_name.is_empty() {
        config.assume_role_agency = Some(profile.agency_name.clone());
    }
    if !profile.agency_domain_name.is_empty() {
        config.assume_role_domain = Some(profile.agency_domain_name.clone());
    }
    if !profile.agency_domain_id.is_empty() {
        config.assume_role_domain_id = Some(profile.agency_domain_id.clone());
    }

    tracing::debug!(
        path = %config_path,
        profile = %profile.name,
        mode = %profile.mode,
        "loaded shared config profile"
    );
    Ok(config)
}

fn set_keys(config: &mut ProviderConfig, access_key: &str, secret_key: &Secret, token: &Secret) {
    config.access_key = Some(access_key.to_owned()).filter(|k| !k.is_empty());
    config.secret_key = Some(secret_key.clone()).filter(|k| !k.is_empty());
    config.security_token = Some(token.clone()).filter(|t| !t.is_empty());
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "current": "b",
        "profiles": [
            {"name": "a", "mode": "AKSK", "accessKeyId": "AK1", "secretAccessKey": "SK1"},
            {"name": "b", "mode": "AKSK", "accessKeyId": "AK2", "secretAccessKey": "SK2",
             "region": "cn-east-3", "projectId": "p-b", "agencyName": "ops",
             "agencyDomainId": "d-ops"},
            {"name": "sso", "mode": "SSO", "ssoAuth": {"stsToken":
                {"accessKeyId": "SSOAK", "secretAccessKey": "SSOSK", "securityToken": "SSOST"}}},
            {"name": "broken-sso", "mode": "SSO"}
        ]
    }"#;

    fn write_document() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), DOCUMENT).unwrap();
        file
    }

    fn config(file: &tempfile::NamedTempFile, profile: Option<&str>) -> ProviderConfig {
        ProviderConfig::builder()
            .region("cn-north-4")
            .shared_config_file(file.path().to_str().unwrap())
            .maybe_profile(profile)
            .build()
            .unwrap()
    }

    #[test]
    fn test_current_profile_is_used_by_default() {
        let file = write_document();
        let applied = apply(config(&file, None)).unwrap();

        assert_eq!(applied.access_key.as_deref(), Some("AK2"));
        assert_eq!(applied.secret_key.as_ref().unwrap().expose(), "SK2");
        assert_eq!(applied.provider_region(), "cn-east-3");
        assert_eq!(applied.project_id(), Some("p-b"));
        assert_eq!(applied.assume_role_agency.as_deref(), Some("ops"));
        assert_eq!(applied.assume_role_domain_id.as_deref(), Some("d-ops"));
        assert!(applied.assume_roles().unwrap()[0].uses_v5());
    }

    #[test]
    fn test_named_profile_overrides_current() {
        let file = write_document();
        let applied = apply(config(&file, Some("a"))).unwrap();

        assert_eq!(applied.access_key.as_deref(), Some("AK1"));
        assert_eq!(applied.provider_region(), "cn-north-4", "empty region is not copied");
    }

    #[test]
    fn test_sso_profile_reads_sts_token() {
        let file = write_document();
        let applied = apply(config(&file, Some("sso"))).unwrap();

        assert_eq!(applied.access_key.as_deref(), Some("SSOAK"));
        assert_eq!(applied.security_token.as_ref().unwrap().expose(), "SSOST");
    }

    #[test]
    fn test_sso_profile_without_token_block_fails() {
        let file = write_document();
        let err = apply(config(&file, Some("broken-sso"))).unwrap_err();
        assert!(err.to_string().contains("ssoAuth"));
    }

    #[test]
    fn test_unknown_profile_fails() {
        let file = write_document();
        let err = apply(config(&file, Some("nope"))).unwrap_err();
        assert!(matches!(err, AuthError::ProfileNotFound { ref profile, .. } if profile == "nope"));
    }

    #[test]
    fn test_missing_file_fails_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let config = ProviderConfig::builder()
            .region("r1")
            .shared_config_file(path.to_str().unwrap())
            .build()
            .unwrap();

        let err = apply(config).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("absent.json"));
    }

    #[test]
    fn test_invalid_json_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "{not json").unwrap();
        let err = apply(config(&file, None)).unwrap_err();
        assert!(matches!(err, AuthError::SharedConfig { .. }));
    }
}
