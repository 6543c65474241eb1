//! HTTP round-trip plumbing.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ RetryingTransport::send(request, signer)                      │
//! │   ├─ assign request id, log redacted request                  │
//! │   ├─ with_connection_retry ──► RoundTrip::round_trip          │
//! │   │      (connect / reset budgets, DNS fails fast)            │
//! │   ├─ log redacted response                                    │
//! │   └─ 3xx + Location ──► rebuild request, re-sign, loop        │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//!             HttpTransport (reqwest, redirects disabled)
//! ```
//!
//! Redirects are followed here rather than inside `reqwest` because an
//! AK/SK signature covers the host and path: the redirected request must be
//! signed again before it leaves.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use fail::fail_point;
use http::{HeaderName, Method, StatusCode};
use reqwest::Request;

use crate::{
    config::{RetryConfig, TlsConfig, TransportConfig},
    error::{Result, TransportError},
    redaction,
    response::HttpResponse,
    retry::with_connection_retry,
    signer::{HEADER_SDK_DATE, RequestSigner},
};

/// Maximum number of redirects followed for one logical request.
pub const MAX_REDIRECTS: usize = 10;

/// A single HTTP exchange.
///
/// Implemented by [`HttpTransport`] for real traffic and by test fakes.
#[async_trait]
pub trait RoundTrip: Send + Sync {
    /// Sends `request` and buffers the full response.
    ///
    /// # Errors
    ///
    /// Returns a classified [`TransportError`] when no complete response
    /// could be read.
    async fn round_trip(&self, request: Request) -> Result<HttpResponse>;
}

/// The base transport: a `reqwest` client with redirects disabled.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Builds the underlying client from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Config`] if TLS material cannot be read or
    /// parsed, or if the proxy URL is invalid.
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(config.user_agent())
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .no_proxy();

        if let Some(proxy) = config.https_proxy.as_deref() {
            let proxy = reqwest::Proxy::https(proxy)
                .map_err(|e| TransportError::config_with_source("invalid https proxy", e))?
                .no_proxy(config.no_proxy.as_deref().and_then(reqwest::NoProxy::from_string));
            builder = builder.proxy(proxy);
        }

        builder = apply_tls(builder, &config.tls)?;

        let client = builder
            .build()
            .map_err(|e| TransportError::config_with_source("failed to build HTTP client", e))?;
        Ok(Self { client })
    }
}

fn apply_tls(
    mut builder: reqwest::ClientBuilder,
    tls: &TlsConfig,
) -> Result<reqwest::ClientBuilder> {
    if tls.insecure {
        tracing::warn!("TLS certificate verification is disabled");
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(ca) = tls.ca_cert.as_deref() {
        let pem = read_path_or_contents(ca, "CA certificate")?;
        let certificate = reqwest::Certificate::from_pem(&pem)
            .map_err(|e| TransportError::config_with_source("invalid CA certificate", e))?;
        builder = builder.add_root_certificate(certificate);
    }

    if let (Some(cert), Some(key)) = (tls.client_cert.as_deref(), tls.client_key.as_deref()) {
        let mut pem = read_path_or_contents(cert, "client certificate")?;
        pem.push(b'\n');
        pem.extend(read_path_or_contents(key, "client key")?);
        let identity = reqwest::Identity::from_pem(&pem)
            .map_err(|e| TransportError::config_with_source("invalid client certificate or key", e))?;
        builder = builder.identity(identity);
    }

    Ok(builder)
}

/// Reads `value` as a file if it names one, else treats it as inline PEM.
fn read_path_or_contents(value: &str, what: &str) -> Result<Vec<u8>> {
    let path = std::path::Path::new(value);
    if !value.contains("-----BEGIN") && path.exists() {
        return std::fs::read(path)
            .map_err(|e| TransportError::config_with_source(format!("failed to read {what}"), e));
    }
    Ok(value.as_bytes().to_vec())
}

#[async_trait]
impl RoundTrip for HttpTransport {
    async fn round_trip(&self, request: Request) -> Result<HttpResponse> {
        fail_point!("transport-round-trip", |_| {
            Err(TransportError::connection("injected connection failure"))
        });
        let url = request.url().clone();
        let response = self.client.execute(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(HttpResponse::new(status, headers, body, url))
    }
}

/// Retrying, logging, redirect-following decorator over a [`RoundTrip`].
///
/// One instance is shared (via `Arc`) by every client built from the same
/// provider configuration. The correlation id counter is the only mutable
/// state.
pub struct RetryingTransport {
    inner: Arc<dyn RoundTrip>,
    config: RetryConfig,
    next_request_id: AtomicU64,
}

impl std::fmt::Debug for RetryingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingTransport")
            .field("config", &self.config)
            .field("next_request_id", &self.next_request_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RetryingTransport {
    /// Wraps `inner` with the given retry policy.
    pub fn new(inner: Arc<dyn RoundTrip>, config: RetryConfig) -> Self {
        Self { inner, config, next_request_id: AtomicU64::new(0) }
    }

    /// Builds an [`HttpTransport`] from `config` and wraps it.
    ///
    /// # Errors
    ///
    /// Propagates [`HttpTransport::new`] failures.
    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        let inner = HttpTransport::new(config)?;
        Ok(Self::new(Arc::new(inner), config.retry.clone()))
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry_config(&self) -> &RetryConfig {
        &self.config
    }

    /// Sends an already-signed request, following redirects.
    ///
    /// On every redirect hop the request is rebuilt for the new location and,
    /// when `signer` is given, signed again.
    ///
    /// # Errors
    ///
    /// - Connection-level failures after retries are exhausted
    /// - [`TransportError::TooManyRedirects`] past [`MAX_REDIRECTS`] hops
    /// - Signing failures on a redirect hop
    #[tracing::instrument(
        skip(self, request, signer),
        fields(method = %request.method(), url = %redaction::redact_url(request.url()))
    )]
    pub async fn send(
        &self,
        mut request: Request,
        signer: Option<&dyn RequestSigner>,
    ) -> Result<HttpResponse> {
        let mut hops = 0usize;

        loop {
            let method = request.method().clone();
            let headers = request.headers().clone();
            let body = request.body().and_then(|b| b.as_bytes()).map(<[u8]>::to_vec);

            let response = self.exchange(request).await?;
            let Some(location) = response.location() else {
                return Ok(response);
            };

            if hops == MAX_REDIRECTS {
                return Err(TransportError::TooManyRedirects { limit: MAX_REDIRECTS });
            }
            hops += 1;

            let target = response.url.join(location).map_err(|e| {
                TransportError::invalid_request_with_source(
                    format!("invalid redirect location: {location}"),
                    e,
                )
            })?;

            let (method, keep_body) = redirect_method(response.status, method);
            let mut next = Request::new(method, target);
            *next.headers_mut() = headers;
            for name in [http::header::AUTHORIZATION, http::header::HOST] {
                next.headers_mut().remove(name);
            }
            next.headers_mut().remove(HeaderName::from_static(HEADER_SDK_DATE));
            match body {
                Some(body) if keep_body => *next.body_mut() = Some(body.into()),
                _ => {
                    next.headers_mut().remove(http::header::CONTENT_LENGTH);
                    next.headers_mut().remove(http::header::CONTENT_TYPE);
                },
            }

            if let Some(signer) = signer {
                signer.sign(&mut next)?;
            }

            tracing::debug!(
                hop = hops,
                status = response.status.as_u16(),
                location = %redaction::redact_url(next.url()),
                resigned = signer.is_some(),
                "following redirect",
            );
            request = next;
        }
    }

    /// One logical exchange: logging plus connection-level retry.
    async fn exchange(&self, request: Request) -> Result<HttpResponse> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        log_request(request_id, &request);

        let result = match request.try_clone() {
            Some(template) => {
                let mut first = Some(request);
                with_connection_retry(&self.config, request_id, |_attempt| {
                    let next = first.take().or_else(|| template.try_clone());
                    let inner = Arc::clone(&self.inner);
                    async move {
                        match next {
                            Some(request) => inner.round_trip(request).await,
                            None => Err(TransportError::invalid_request("request cannot be replayed")),
                        }
                    }
                })
                .await
            },
            // Streaming bodies cannot be replayed; send once.
            None => self.inner.round_trip(request).await,
        };

        match &result {
            Ok(response) => log_response(request_id, response),
            Err(err) => tracing::debug!(request_id, error = %err, "request failed"),
        }
        result
    }
}

#[async_trait]
impl RoundTrip for RetryingTransport {
    async fn round_trip(&self, request: Request) -> Result<HttpResponse> {
        self.send(request, None).await
    }
}

/// Method for the next hop, and whether the body is carried over.
fn redirect_method(status: StatusCode, method: Method) -> (Method, bool) {
    match status {
        StatusCode::SEE_OTHER if method != Method::HEAD => (Method::GET, false),
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND if method == Method::POST => {
            (Method::GET, false)
        },
        _ => (method, true),
    }
}

fn log_request(request_id: u64, request: &Request) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    let body = request
        .body()
        .map(|b| b.as_bytes().map(redaction::format_body).unwrap_or_else(|| "<stream>".to_owned()))
        .unwrap_or_default();
    tracing::debug!(
        request_id,
        method = %request.method(),
        url = %redaction::redact_url(request.url()),
        headers = %redaction::format_headers(request.headers()),
        body = %body,
        "API request",
    );
}

fn log_response(request_id: u64, response: &HttpResponse) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    let is_json = response
        .header("content-type")
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));
    let body = if is_json {
        redaction::format_body(&response.body)
    } else {
        format!("<{} bytes, {}>", response.body.len(), response.header("content-type").unwrap_or("no content type"))
    };
    tracing::debug!(
        request_id,
        status = response.status.as_u16(),
        headers = %redaction::format_headers(&response.headers),
        body = %body,
        "API response",
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_method_rules() {
        assert_eq!(redirect_method(StatusCode::SEE_OTHER, Method::POST), (Method::GET, false));
        assert_eq!(redirect_method(StatusCode::FOUND, Method::POST), (Method::GET, false));
        assert_eq!(redirect_method(StatusCode::FOUND, Method::GET), (Method::GET, true));
        assert_eq!(
            redirect_method(StatusCode::TEMPORARY_REDIRECT, Method::PUT),
            (Method::PUT, true)
        );
        assert_eq!(
            redirect_method(StatusCode::PERMANENT_REDIRECT, Method::POST),
            (Method::POST, true)
        );
    }

    #[test]
    fn test_read_path_or_contents_inline_pem() {
        let pem = "-----BEGIN CERTIFICATE-----\nabc\n-----END CERTIFICATE-----\n";
        assert_eq!(read_path_or_contents(pem, "ca").unwrap(), pem.as_bytes());
    }

    #[test]
    fn test_read_path_or_contents_file() {
        let path = std::env::temp_dir().join(format!("hwcloud-ca-{}.pem", std::process::id()));
        std::fs::write(&path, b"from-file").unwrap();
        let bytes = read_path_or_contents(path.to_str().unwrap(), "ca").unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(bytes, b"from-file");
    }

    #[test]
    fn test_http_transport_builds_with_defaults() {
        assert!(HttpTransport::new(&TransportConfig::default()).is_ok());
    }

    #[test]
    fn test_http_transport_builds_with_proxy_bypass() {
        let config = TransportConfig::builder()
            .https_proxy("http://proxy.internal:3128")
            .no_proxy("localhost,.internal")
            .build();
        assert!(HttpTransport::new(&config).is_ok());
    }

    #[test]
    fn test_http_transport_rejects_bad_proxy() {
        let config = TransportConfig::builder().https_proxy("::not a url::").build();
        assert!(matches!(HttpTransport::new(&config), Err(TransportError::Config { .. })));
    }
}
