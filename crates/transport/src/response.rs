//! Buffered HTTP responses.

use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::{
    error::{Result, TransportError},
    redaction,
};

/// Longest body excerpt carried in a [`TransportError::Status`].
const ERROR_BODY_EXCERPT: usize = 512;

/// A response whose body has been read in full.
///
/// Reading the body inside the transport means a connection reset during the
/// body transfer is seen by the retry loop instead of by the caller.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Vec<u8>,
    /// URL the response was received from.
    pub url: Url,
}

impl HttpResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: Vec<u8>, url: Url) -> Self {
        Self { status, headers, body, url }
    }

    /// Returns a header value as text, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the `Location` header for redirect responses.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        if self.status.is_redirection() { self.header("location") } else { None }
    }

    /// Returns the body as lossy UTF-8 text.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserializes the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Decode`] if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            TransportError::decode_with_source(
                format!("invalid JSON response from {}", redaction::redact_url(&self.url)),
                e,
            )
        })
    }

    /// Converts non-2xx responses into errors.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Throttled`] for 429 and
    /// [`TransportError::Status`] for any other non-success status.
    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_success() {
            return Ok(self);
        }
        let mut body = self.text();
        if body.len() > ERROR_BODY_EXCERPT {
            let mut cut = ERROR_BODY_EXCERPT;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(TransportError::from_status(self.status.as_u16(), redaction::redact_url(&self.url), body))
    }
}
