//! Configuration for the HTTP transport and its retry policies.
//!
//! [`RetryConfig`] drives both the connection-level retry loop inside
//! [`RetryingTransport`](crate::RetryingTransport) and the 429 throttle
//! wrapper [`with_throttle_retry`](crate::with_throttle_retry).
//! [`TransportConfig`] describes how the underlying `reqwest` client is
//! built: TLS material, proxying, timeouts and the user agent.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default first connection-retry delay.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Default cap on a connection-retry delay (10 minutes).
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(600);

/// Default first throttle-retry delay (1 minute).
pub const DEFAULT_THROTTLE_BACKOFF: Duration = Duration::from_secs(60);

/// Default cap on a throttle-retry delay (30 minutes).
pub const DEFAULT_MAX_THROTTLE_BACKOFF: Duration = Duration::from_secs(30 * 60);

/// Default whole-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// User agent sent by every client.
pub const DEFAULT_USER_AGENT: &str = concat!("hwcloud-rs/", env!("CARGO_PKG_VERSION"));

/// Retry policy for connection failures and throttled responses.
///
/// Delays grow as `base * 2^attempt`, capped per policy:
///
/// | Policy | Base | Cap |
/// |---|---|---|
/// | connection failure / reset | `initial_backoff` (1s) | `max_backoff` (10m) |
/// | HTTP 429 | `throttle_backoff` (1m) | `max_throttle_backoff` (30m) |
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use hwcloud_transport::RetryConfig;
///
/// let config = RetryConfig::builder()
///     .max_retries(3)
///     .initial_backoff(Duration::from_millis(10))
///     .build()?;
/// assert_eq!(config.max_retries(), 3);
/// # Ok::<(), hwcloud_transport::TransportError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the first attempt; `0` disables retrying.
    #[serde(default = "default_max_retries")]
    pub(crate) max_retries: u32,

    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    pub(crate) initial_backoff: Duration,

    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    pub(crate) max_backoff: Duration,

    #[serde(with = "humantime_serde", default = "default_throttle_backoff")]
    pub(crate) throttle_backoff: Duration,

    #[serde(with = "humantime_serde", default = "default_max_throttle_backoff")]
    pub(crate) max_throttle_backoff: Duration,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_initial_backoff() -> Duration {
    DEFAULT_INITIAL_BACKOFF
}

fn default_max_backoff() -> Duration {
    DEFAULT_MAX_BACKOFF
}

fn default_throttle_backoff() -> Duration {
    DEFAULT_THROTTLE_BACKOFF
}

fn default_max_throttle_backoff() -> Duration {
    DEFAULT_MAX_THROTTLE_BACKOFF
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            throttle_backoff: DEFAULT_THROTTLE_BACKOFF,
            max_throttle_backoff: DEFAULT_MAX_THROTTLE_BACKOFF,
        }
    }
}

#[bon::bon]
impl RetryConfig {
    /// Creates a retry policy, validating the backoff bounds.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Config`] if:
    /// - `initial_backoff` or `throttle_backoff` is zero
    /// - a cap is smaller than its base delay
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_MAX_RETRIES)] max_retries: u32,
        #[builder(default = DEFAULT_INITIAL_BACKOFF)] initial_backoff: Duration,
        #[builder(default = DEFAULT_MAX_BACKOFF)] max_backoff: Duration,
        #[builder(default = DEFAULT_THROTTLE_BACKOFF)] throttle_backoff: Duration,
        #[builder(default = DEFAULT_MAX_THROTTLE_BACKOFF)] max_throttle_backoff: Duration,
    ) -> Result<Self> {
        if initial_backoff.is_zero() {
            return Err(TransportError::config("initial_backoff must be greater than zero"));
        }
        if max_backoff < initial_backoff {
            return Err(TransportError::config(format!(
                "max_backoff ({max_backoff:?}) must be >= initial_backoff ({initial_backoff:?})"
            )));
        }
        if throttle_backoff.is_zero() {
            return Err(TransportError::config("throttle_backoff must be greater than zero"));
        }
        if max_throttle_backoff < throttle_backoff {
            return Err(TransportError::config(format!(
                "max_throttle_backoff ({max_throttle_backoff:?}) must be >= throttle_backoff ({throttle_backoff:?})"
            )));
        }

        Ok(Self { max_retries, initial_backoff, max_backoff, throttle_backoff, max_throttle_backoff })
    }

    /// Returns the number of retries after the first attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the first connection-retry delay.
    #[must_use]
    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Returns the connection-retry delay cap.
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Returns the first throttle-retry delay.
    #[must_use]
    pub fn throttle_backoff(&self) -> Duration {
        self.throttle_backoff
    }

    /// Returns the throttle-retry delay cap.
    #[must_use]
    pub fn max_throttle_backoff(&self) -> Duration {
        self.max_throttle_backoff
    }
}

/// TLS options for the outbound client.
///
/// Certificate and key fields accept either a file path or the PEM text
/// itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    /// Skip server certificate verification.
    #[serde(default)]
    #[builder(default)]
    pub insecure: bool,

    /// Extra CA bundle (path or PEM).
    #[serde(default)]
    #[builder(into)]
    pub ca_cert: Option<String>,

    /// Client certificate (path or PEM). Used only together with `client_key`.
    #[serde(default)]
    #[builder(into)]
    pub client_cert: Option<String>,

    /// Client private key (path or PEM). Used only together with `client_cert`.
    #[serde(default)]
    #[builder(into)]
    pub client_key: Option<String>,
}

/// Settings for [`HttpTransport`](crate::HttpTransport).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Connection retry policy.
    #[serde(default)]
    #[builder(default)]
    pub retry: RetryConfig,

    /// TLS options.
    #[serde(default)]
    #[builder(default)]
    pub tls: TlsConfig,

    /// Whole-request timeout.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    #[builder(default = DEFAULT_TIMEOUT)]
    pub timeout: Duration,

    /// Connect timeout.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    pub connect_timeout: Duration,

    /// Proxy for `https` URLs. Usually taken from `HTTPS_PROXY`.
    #[serde(default)]
    #[builder(into)]
    pub https_proxy: Option<String>,

    /// Hosts that bypass the proxy, in `NO_PROXY` syntax.
    #[serde(default)]
    #[builder(into)]
    pub no_proxy: Option<String>,

    /// Prepended to [`DEFAULT_USER_AGENT`].
    #[serde(default)]
    #[builder(into)]
    pub user_agent_prefix: Option<String>,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl TransportConfig {
    /// Fills `https_proxy` and `no_proxy` from the environment when unset.
    #[must_use]
    pub fn with_env_proxy(mut self) -> Self {
        let lookup = |key: &str| std::env::var(key).ok();
        if self.https_proxy.is_none() {
            self.https_proxy = https_proxy_from(lookup);
        }
        if self.no_proxy.is_none() {
            self.no_proxy = no_proxy_from(lookup);
        }
        self
    }

    /// Returns the full user agent string.
    #[must_use]
    pub fn user_agent(&self) -> String {
        match self.user_agent_prefix.as_deref().map(str::trim) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix} {DEFAULT_USER_AGENT}"),
            _ => DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

/// Resolves the https proxy from an environment lookup.
///
/// The upper-case name wins when both are set.
pub fn https_proxy_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    first_set(["HTTPS_PROXY", "https_proxy"], lookup)
}

/// Resolves the proxy bypass list from an environment lookup.
///
/// The upper-case name wins when both are set.
pub fn no_proxy_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    first_set(["NO_PROXY", "no_proxy"], lookup)
}

fn first_set(keys: [&str; 2], lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    keys.into_iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_owned())
        .find(|value| !value.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_builder_defaults_match_default_impl() {
        let built = RetryConfig::builder().build().unwrap();
        assert_eq!(built, RetryConfig::default());
        assert_eq!(built.max_retries(), 5);
        assert_eq!(built.max_backoff(), Duration::from_secs(600));
        assert_eq!(built.max_throttle_backoff(), Duration::from_secs(1800));
    }

    #[test]
    fn test_retry_rejects_zero_initial_backoff() {
        let result = RetryConfig::builder().initial_backoff(Duration::ZERO).build();
        assert!(matches!(result, Err(TransportError::Config { .. })));
    }

    #[test]
    fn test_retry_rejects_cap_below_base() {
        let result = RetryConfig::builder()
            .initial_backoff(Duration::from_secs(5))
            .max_backoff(Duration::from_secs(1))
            .build();
        assert!(result.is_err());

        let result = RetryConfig::builder()
            .throttle_backoff(Duration::from_secs(120))
            .max_throttle_backoff(Duration::from_secs(60))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_retry_allows_zero_retries() {
        let config = RetryConfig::builder().max_retries(0).build().unwrap();
        assert_eq!(config.max_retries(), 0);
    }

    #[test]
    fn test_retry_deserializes_humantime() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"max_retries": 2, "initial_backoff": "250ms"}"#).unwrap();
        assert_eq!(config.max_retries(), 2);
        assert_eq!(config.initial_backoff(), Duration::from_millis(250));
        assert_eq!(config.max_backoff(), DEFAULT_MAX_BACKOFF);
    }

    #[test]
    fn test_user_agent_prefix() {
        let config = TransportConfig::builder().user_agent_prefix("my-tool/1.0").build();
        assert_eq!(config.user_agent(), format!("my-tool/1.0 {DEFAULT_USER_AGENT}"));

        let config = TransportConfig::builder().user_agent_prefix("   ").build();
        assert_eq!(config.user_agent(), DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_https_proxy_prefers_upper_case() {
        let proxy = https_proxy_from(|key| match key {
            "HTTPS_PROXY" => Some("http://upper:3128".into()),
            "https_proxy" => Some("http://lower:3128".into()),
            _ => None,
        });
        assert_eq!(proxy.as_deref(), Some("http://upper:3128"));
    }

    #[test]
    fn test_https_proxy_falls_back_to_lower_case() {
        let proxy = https_proxy_from(|key| match key {
            "HTTPS_PROXY" => Some(String::new()),
            "https_proxy" => Some("http://lower:3128".into()),
            _ => None,
        });
        assert_eq!(proxy.as_deref(), Some("http://lower:3128"));
        assert_eq!(https_proxy_from(|_| None), None);
    }

    #[test]
    fn test_no_proxy_read_from_either_case() {
        let no_proxy = no_proxy_from(|key| match key {
            "no_proxy" => Some(" .internal,localhost ".into()),
            _ => None,
        });
        assert_eq!(no_proxy.as_deref(), Some(".internal,localhost"));
        assert_eq!(no_proxy_from(|_| Some("  ".into())), None);
    }
}
