//! Request signing.
//!
//! Two signing contexts exist:
//!
//! - [`TokenSigner`] attaches an `X-Auth-Token` header.
//! - [`AkSkSigner`] computes an `SDK-HMAC-SHA256` signature over the
//!   canonical form of the request and attaches it as `Authorization`.
//!
//! Signatures cover the host and path, so a redirected request must be
//! signed again; [`RetryingTransport`](crate::RetryingTransport) does that
//! through the [`RequestSigner`] trait.
//!
//! # Canonical request
//!
//! ```text
//! METHOD\n
//! /canonical/uri/\n
//! sorted&escaped=query\n
//! lowercase-name:trimmed value\n   (one line per signed header, sorted)
//! \n
//! signed;header;names\n
//! hex(sha256(body))
//! ```
//!
//! The string to sign is `SDK-HMAC-SHA256\n{X-Sdk-Date}\n{hex(sha256(canonical))}`.

use std::fmt;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use http::{HeaderName, HeaderValue};
use reqwest::Request;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{Result, TransportError};

type HmacSha256 = Hmac<Sha256>;

/// Signing algorithm identifier.
pub const ALGORITHM: &str = "SDK-HMAC-SHA256";

/// Header carrying the signing timestamp.
pub const HEADER_SDK_DATE: &str = "x-sdk-date";

/// Header carrying the temporary-credential token.
pub const HEADER_SECURITY_TOKEN: &str = "x-security-token";

/// Header carrying the project scope of an AK/SK request.
pub const HEADER_PROJECT_ID: &str = "x-project-id";

/// Header carrying the domain scope of an AK/SK request.
pub const HEADER_DOMAIN_ID: &str = "x-domain-id";

/// Header carrying an IAM token.
pub const HEADER_AUTH_TOKEN: &str = "x-auth-token";

const SDK_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Attaches credentials to an outgoing request.
///
/// Implementations must be idempotent: signing an already-signed request
/// replaces the previous signature.
pub trait RequestSigner: Send + Sync + fmt::Debug {
    /// Signs `request` in place.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidRequest`] if the request cannot be
    /// represented in signed form.
    fn sign(&self, request: &mut Request) -> Result<()>;
}

/// Signs requests with an IAM token.
#[derive(Clone)]
pub struct TokenSigner {
    token: Zeroizing<String>,
}

impl TokenSigner {
    /// Creates a token signer.
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: Zeroizing::new(token.into()) }
    }
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner").field("token", &"***").finish()
    }
}

impl RequestSigner for TokenSigner {
    fn sign(&self, request: &mut Request) -> Result<()> {
        let value = HeaderValue::from_str(&self.token)
            .map_err(|e| TransportError::invalid_request_with_source("token is not a valid header value", e))?;
        request.headers_mut().insert(HeaderName::from_static(HEADER_AUTH_TOKEN), value);
        Ok(())
    }
}

/// Signs requests with an access key / secret key pair.
#[derive(Clone, bon::Builder)]
pub struct AkSkSigner {
    #[builder(into)]
    access_key: String,
    #[builder(with = |secret: impl Into<String>| Zeroizing::new(secret.into()))]
    secret_key: Zeroizing<String>,
    #[builder(into)]
    security_token: Option<String>,
    #[builder(into)]
    project_id: Option<String>,
    #[builder(into)]
    domain_id: Option<String>,
}

impl fmt::Debug for AkSkSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AkSkSigner")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .field("security_token", &self.security_token.as_ref().map(|_| "***"))
            .field("project_id", &self.project_id)
            .field("domain_id", &self.domain_id)
            .finish()
    }
}

impl AkSkSigner {
    /// Returns the access key.
    #[must_use]
    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// Signs `request` as of `now`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidRequest`] if a header value cannot be
    /// encoded.
    pub fn sign_at(&self, request: &mut Request, now: DateTime<Utc>) -> Result<()> {
        let headers = request.headers_mut();
        headers.remove(http::header::AUTHORIZATION);

        let date = now.format(SDK_DATE_FORMAT).to_string();
        insert_header(request, HEADER_SDK_DATE, &date)?;
        if let Some(token) = self.security_token.as_deref().filter(|t| !t.is_empty()) {
            insert_header(request, HEADER_SECURITY_TOKEN, token)?;
        }
        if let Some(project_id) = self.project_id.as_deref().filter(|p| !p.is_empty()) {
            insert_header(request, HEADER_PROJECT_ID, project_id)?;
        }
        if let Some(domain_id) = self.domain_id.as_deref().filter(|d| !d.is_empty()) {
            insert_header(request, HEADER_DOMAIN_ID, domain_id)?;
        }

        let (canonical, signed_headers) = canonical_request(request);
        let string_to_sign =
            format!("{ALGORITHM}\n{date}\n{}", hex::encode(Sha256::digest(canonical.as_bytes())));
        let signature = hmac_hex(self.secret_key.as_bytes(), string_to_sign.as_bytes())?;

        let authorization = format!(
            "{ALGORITHM} Access={}, SignedHeaders={signed_headers}, Signature={signature}",
            self.access_key
        );
        let value = HeaderValue::from_str(&authorization).map_err(|e| {
            TransportError::invalid_request_with_source("access key is not a valid header value", e)
        })?;
        request.headers_mut().insert(http::header::AUTHORIZATION, value);
        Ok(())
    }
}

impl RequestSigner for AkSkSigner {
    fn sign(&self, request: &mut Request) -> Result<()> {
        self.sign_at(request, Utc::now())
    }
}

fn insert_header(request: &mut Request, name: &'static str, value: &str) -> Result<()> {
    let value = HeaderValue::from_str(value)
        .map_err(|e| TransportError::invalid_request_with_source(format!("invalid {name} header"), e))?;
    request.headers_mut().insert(HeaderName::from_static(name), value);
    Ok(())
}

fn hmac_hex(key: &[u8], data: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| TransportError::invalid_request(format!("invalid signing key: {e}")))?;
    mac.update(data);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Builds the canonical request and the `;`-joined signed header list.
fn canonical_request(request: &Request) -> (String, String) {
    let url = request.url();

    let mut uri = url.path().to_owned();
    if !uri.ends_with('/') {
        uri.push('/');
    }

    let mut query: Vec<(String, String)> =
        url.query_pairs().map(|(k, v)| (escape(&k), escape(&v))).collect();
    query.sort();
    let query = query.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");

    let mut headers: Vec<(String, String)> = request
        .headers()
        .iter()
        .filter(|(name, _)| *name != http::header::AUTHORIZATION)
        .map(|(name, value)| {
            (name.as_str().to_owned(), String::from_utf8_lossy(value.as_bytes()).trim().to_owned())
        })
        .collect();
    if !request.headers().contains_key(http::header::HOST)
        && let Some(host) = url.host_str()
    {
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };
        headers.push(("host".to_owned(), host));
    }
    headers.sort();

    let canonical_headers: String =
        headers.iter().map(|(name, value)| format!("{name}:{value}\n")).collect();
    let signed_headers = headers.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>().join(";");

    let payload_hash = match request.body().map(|b| b.as_bytes()) {
        Some(Some(bytes)) => hex::encode(Sha256::digest(bytes)),
        Some(None) => "UNSIGNED-PAYLOAD".to_owned(),
        None => hex::encode(Sha256::digest(b"")),
    };

    let canonical = format!(
        "{}\n{uri}\n{query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}",
        request.method().as_str()
    );
    (canonical, signed_headers)
}

/// Percent-encodes everything outside the RFC 3986 unreserved set.
fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
