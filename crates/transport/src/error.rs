//! Transport error types and result alias.
//!
//! Every failure that can happen between "a signed request exists" and "a
//! response body is buffered" is mapped onto [`TransportError`]. The retry
//! layer decides what to do with an error purely from its variant:
//!
//! - [`TransportError::Connection`] - no response at all; retried
//! - [`TransportError::ConnectionReset`] - peer reset the connection; retried
//! - [`TransportError::Dns`] - host name did not resolve; never retried
//! - [`TransportError::Throttled`] - HTTP 429; retried by the throttle wrapper only
//! - [`TransportError::RetriesExhausted`] - the retry budget ran out
//!
//! # Example
//!
//! ```
//! use hwcloud_transport::{TransportError, Result};
//!
//! fn dial(host: &str) -> Result<()> {
//!     Err(TransportError::dns(format!("no such host: {host}")))
//! }
//!
//! assert!(!dial("iam.example").unwrap_err().is_transient());
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A shared, boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for transport operations.
pub type Result<T, E = TransportError> = std::result::Result<T, E>;

/// Errors produced by the HTTP transport stack.
///
/// Errors preserve their source chain via `#[source]`, so the last
/// underlying cause of an exhausted retry loop is still reachable.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The host name could not be resolved.
    #[error("DNS error: {message}")]
    Dns {
        /// Description of the resolution failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// The round trip produced no response (refused, timed out, closed).
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// The peer reset the connection, possibly after a response was obtained.
    #[error("Connection reset by peer: {message}")]
    ConnectionReset {
        /// Description of the reset.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// Connection-level retries were exhausted.
    #[error("connection error, retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Total attempts made, including the first.
        attempts: u32,
        /// The last underlying failure.
        #[source]
        last: Box<TransportError>,
    },

    /// The server answered 429 Too Many Requests.
    #[error("Too many requests: {url}")]
    Throttled {
        /// Redacted URL of the throttled request.
        url: String,
    },

    /// A cancellable wait was abandoned.
    #[error("Operation cancelled")]
    Cancelled {
        /// The error that was being waited out, if any.
        #[source]
        last: Option<Box<TransportError>>,
    },

    /// The server answered with an unexpected status code.
    #[error("Unexpected status {status} from {url}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Redacted URL of the request.
        url: String,
        /// Response body, possibly truncated.
        body: String,
    },

    /// Redirect chain exceeded the hop limit.
    #[error("Stopped after {limit} redirects")]
    TooManyRedirects {
        /// Maximum hops followed.
        limit: usize,
    },

    /// A request could not be built or signed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of the problem.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// The transport itself could not be configured (TLS material, proxy).
    #[error("Transport configuration error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// A response body could not be decoded.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of the decoding problem.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },
}

impl TransportError {
    /// Creates a new `Dns` error.
    #[must_use]
    pub fn dns(message: impl Into<String>) -> Self {
        Self::Dns { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `ConnectionReset` error.
    #[must_use]
    pub fn connection_reset(message: impl Into<String>) -> Self {
        Self::ConnectionReset { message: message.into(), source: None }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest { message: message.into(), source: None }
    }

    /// Creates a new `InvalidRequest` error with a source error.
    #[must_use]
    pub fn invalid_request_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::InvalidRequest { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Creates a new `Config` error with a source error.
    #[must_use]
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Decode` error with a source error.
    #[must_use]
    pub fn decode_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Decode { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Maps a non-success status onto an error, singling out 429.
    #[must_use]
    pub fn from_status(status: u16, url: impl Into<String>, body: impl Into<String>) -> Self {
        if status == 429 {
            Self::Throttled { url: url.into() }
        } else {
            Self::Status { status, url: url.into(), body: body.into() }
        }
    }

    /// Returns `true` for failures worth retrying.
    ///
    /// DNS failures are excluded: a name that does not resolve now will not
    /// resolve a few seconds later either.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::ConnectionReset { .. } | Self::Throttled { .. })
    }

    /// Returns `true` if this is an HTTP 429 answer.
    #[must_use]
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }

    /// Returns the HTTP status carried by this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Throttled { .. } => Some(429),
            _ => None,
        }
    }
}

/// Classifies a `reqwest` failure into the retry taxonomy.
///
/// `reqwest` does not expose DNS or reset conditions directly, so the source
/// chain is walked for an `io::ErrorKind::ConnectionReset` and for resolver
/// messages.
impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let chain = error_chain_text(&err);
        let message = err.to_string();

        if has_io_kind(&err, std::io::ErrorKind::ConnectionReset)
            || chain.contains("connection reset")
        {
            return Self::ConnectionReset { message, source: Some(Arc::new(err)) };
        }

        if err.is_connect()
            && (chain.contains("dns error")
                || chain.contains("failed to lookup address")
                || chain.contains("no such host"))
        {
            return Self::Dns { message, source: Some(Arc::new(err)) };
        }

        if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
            return Self::Connection { message, source: Some(Arc::new(err)) };
        }

        if err.is_decode() {
            return Self::Decode { message, source: Some(Arc::new(err)) };
        }

        if err.is_builder() {
            return Self::InvalidRequest { message, source: Some(Arc::new(err)) };
        }

        Self::Connection { message, source: Some(Arc::new(err)) }
    }
}

fn error_chain_text(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string().to_lowercase();
    let mut current = err.source();
    while let Some(cause) = current {
        text.push_str(": ");
        text.push_str(&cause.to_string().to_lowercase());
        current = cause.source();
    }
    text
}

fn has_io_kind(err: &(dyn std::error::Error + 'static), kind: std::io::ErrorKind) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(cause) = current {
        if let Some(io) = cause.downcast_ref::<std::io::Error>()
            && io.kind() == kind
        {
            return true;
        }
        current = cause.source();
    }
    false
}
