//! Credential value types.
//!
//! [`Credentials`] is an immutable snapshot of one AK/SK pair. A refresh
//! builds a new snapshot and swaps it into the
//! [`SecurityKeyCache`](crate::SecurityKeyCache) in one step. Readers keep
//! whichever `Arc<Credentials>` they loaded, so they never see a mix of old
//! and new fields.

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use zeroize::Zeroizing;

/// Temporary credentials are refreshed once they are this close to expiry.
pub const REFRESH_WINDOW: Duration = Duration::from_secs(REFRESH_WINDOW_SECS as u64);

const REFRESH_WINDOW_SECS: i64 = 600;

/// A secret string: zeroized on drop and masked in `Debug` output.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    /// Wraps a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Returns the secret value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the secret is the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"***\"")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// Where a set of credentials came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CredentialOrigin {
    /// Configured directly (provider settings or environment).
    Static,
    /// Read from the shared credentials file.
    SharedFile,
    /// Issued by the instance metadata service.
    Metadata,
    /// Issued by an assume-role exchange.
    Agency,
    /// Issued for an identity-provider ID token.
    Federation,
}

impl fmt::Display for CredentialOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Static => "static",
            Self::SharedFile => "shared_file",
            Self::Metadata => "metadata",
            Self::Agency => "agency",
            Self::Federation => "federation",
        };
        f.write_str(name)
    }
}

/// One AK/SK credential snapshot.
#[derive(Clone)]
pub struct Credentials {
    access_key: String,
    secret_key: Secret,
    security_token: Option<Secret>,
    expires_at: Option<DateTime<Utc>>,
    origin: CredentialOrigin,
}

impl Credentials {
    /// Creates long-lived credentials.
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<Secret>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            security_token: None,
            expires_at: None,
            origin: CredentialOrigin::Static,
        }
    }

    /// Attaches a security token, marking the credentials as temporary.
    #[must_use]
    pub fn with_security_token(mut self, token: impl Into<Secret>) -> Self {
        let token = token.into();
        self.security_token = (!token.is_empty()).then_some(token);
        self
    }

    /// Sets the expiry instant.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Records where the credentials came from.
    #[must_use]
    pub fn with_origin(mut self, origin: CredentialOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Returns the access key.
    #[must_use]
    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// Returns the secret key.
    #[must_use]
    pub fn secret_key(&self) -> &str {
        self.secret_key.expose()
    }

    /// Returns the security token of temporary credentials.
    #[must_use]
    pub fn security_token(&self) -> Option<&str> {
        self.security_token.as_ref().map(Secret::expose)
    }

    /// Returns the expiry instant, if the credentials expire.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Returns where the credentials came from.
    #[must_use]
    pub fn origin(&self) -> CredentialOrigin {
        self.origin
    }

    /// Returns `true` if `now + REFRESH_WINDOW` is past the expiry.
    ///
    /// Credentials without an expiry never need a refresh.
    #[must_use]
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        now + chrono::Duration::seconds(REFRESH_WINDOW_SECS) > expires_at
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key)
            .field("security_token", &self.security_token)
            .field("expires_at", &self.expires_at)
            .field("origin", &self.origin)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_masks_secrets() {
        let creds = Credentials::new("AKID", "very-secret").with_security_token("sts-token");
        let debug = format!("{creds:?}");
        assert!(debug.contains("AKID"));
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("sts-token"));
    }

    #[test]
    fn test_static_credentials_never_refresh() {
        let creds = Credentials::new("AK", "SK");
        assert!(!creds.needs_refresh(Utc::now()));
    }

    #[test]
    fn test_refresh_window_boundary() {
        let now = Utc::now();
        let fresh = Credentials::new("AK", "SK").with_expiry(now + chrono::Duration::minutes(11));
        assert!(!fresh.needs_refresh(now));

        let near = Credentials::new("AK", "SK").with_expiry(now + chrono::Duration::minutes(9));
        assert!(near.needs_refresh(now));

        let past = Credentials::new("AK", "SK").with_expiry(now - chrono::Duration::seconds(1));
        assert!(past.needs_refresh(now));
    }

    #[test]
    fn test_empty_security_token_is_dropped() {
        let creds = Credentials::new("AK", "SK").with_security_token("");
        assert_eq!(creds.security_token(), None);
    }

    #[test]
    fn test_secret_deserializes_from_string() {
        let secret: Secret = serde_json::from_str("\"s3cr3t\"").unwrap();
        assert_eq!(secret.expose(), "s3cr3t");
        assert_eq!(format!("{secret:?}"), "\"***\"");
    }
}
