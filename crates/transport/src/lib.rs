//! # hwcloud transport
//!
//! The HTTP layer underneath every Huawei Cloud service client.
//!
//! This crate provides:
//! - **Retrying transport**: connection failures and resets retried with
//!   bounded exponential backoff; DNS failures fail fast
//! - **Redirect re-signing**: redirects are followed in-process and each hop
//!   is signed again
//! - **Redacted logging**: request/response logs with secrets masked
//! - **Request signing**: `SDK-HMAC-SHA256` AK/SK signatures and IAM tokens
//! - **Throttle retry**: cancellable backoff for HTTP 429 answers
//!
//! ## Example
//!
//! ```no_run
//! use hwcloud_transport::{AkSkSigner, RequestSigner, RetryingTransport, TransportConfig};
//!
//! # async fn example() -> Result<(), hwcloud_transport::TransportError> {
//! let transport = RetryingTransport::from_config(&TransportConfig::default().with_env_proxy())?;
//! let signer = AkSkSigner::builder().access_key("AK").secret_key("SK").project_id("p-1").build();
//!
//! let url = url::Url::parse("https://ecs.cn-north-4.myhuaweicloud.com/v1/p-1/cloudservers/detail")
//!     .map_err(|e| hwcloud_transport::TransportError::invalid_request(e.to_string()))?;
//! let mut request = reqwest::Request::new(reqwest::Method::GET, url);
//! signer.sign(&mut request)?;
//!
//! let response = transport.send(request, Some(&signer)).await?.error_for_status()?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Transport configuration.
pub mod config;
/// Transport error types.
pub mod error;
/// Log redaction.
pub mod redaction;
/// Buffered responses.
pub mod response;
/// Retry policies.
pub mod retry;
/// Request signing.
pub mod signer;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
/// Round-trip plumbing.
pub mod transport;

pub use config::{RetryConfig, TlsConfig, TransportConfig};
pub use error::{BoxError, Result, TransportError};
pub use response::HttpResponse;
pub use retry::with_throttle_retry;
pub use signer::{AkSkSigner, RequestSigner, TokenSigner};
pub use transport::{HttpTransport, MAX_REDIRECTS, RetryingTransport, RoundTrip};

// Shared across tasks behind `Arc`.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<RetryingTransport>();
    assert_send_sync::<AkSkSigner>();
    assert_send_sync::<TokenSigner>();
};
