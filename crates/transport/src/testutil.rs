//! Shared test utilities for transport testing.
//!
//! Feature-gated behind `testutil` so fakes never reach production builds.
//!
//! ```toml
//! [dev-dependencies]
//! hwcloud-transport = { path = "../transport", features = ["testutil"] }
//! ```

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, StatusCode};
use parking_lot::Mutex;
use reqwest::Request;
use url::Url;

use crate::{
    error::{Result, TransportError},
    response::HttpResponse,
    transport::RoundTrip,
};

/// What a [`ScriptedTransport`] does on one call.
pub enum Step {
    /// Answer with this status, headers and body.
    Respond {
        /// Status code.
        status: u16,
        /// Extra headers.
        headers: Vec<(&'static str, String)>,
        /// Body bytes.
        body: Vec<u8>,
    },
    /// Fail with this error.
    Fail(TransportError),
}

impl Step {
    /// A JSON answer.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::Respond {
            status,
            headers: vec![("content-type", "application/json".to_owned())],
            body: body.to_string().into_bytes(),
        }
    }

    /// An empty answer with one extra header.
    pub fn with_header(status: u16, name: &'static str, value: impl Into<String>) -> Self {
        Self::Respond { status, headers: vec![(name, value.into())], body: Vec::new() }
    }

    /// A connection failure.
    pub fn refused() -> Self {
        Self::Fail(TransportError::connection("connection refused"))
    }

    /// A connection reset.
    pub fn reset() -> Self {
        Self::Fail(TransportError::connection_reset("connection reset by peer"))
    }
}

/// A [`RoundTrip`] fake that replays a script and records every request.
///
/// Once the script is empty, every further call fails with a connection
/// error.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<RecordedRequest>>,
    calls: AtomicUsize,
}

/// The parts of a request a test usually asserts on.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Method.
    pub method: http::Method,
    /// Full URL.
    pub url: Url,
    /// Headers as sent.
    pub headers: HeaderMap,
    /// Body bytes, if buffered.
    pub body: Option<Vec<u8>>,
}

impl ScriptedTransport {
    /// Creates a fake that plays `steps` in order.
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    /// Creates a fake that always fails with a connection error.
    pub fn always_refused() -> Arc<Self> {
        Self::new([])
    }

    /// Number of round trips made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl RoundTrip for ScriptedTransport {
    async fn round_trip(&self, request: Request) -> Result<HttpResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(RecordedRequest {
            method: request.method().clone(),
            url: request.url().clone(),
            headers: request.headers().clone(),
            body: request.body().and_then(|b| b.as_bytes()).map(<[u8]>::to_vec),
        });

        let step = self.script.lock().pop_front().unwrap_or_else(Step::refused);
        match step {
            Step::Respond { status, headers, body } => {
                let mut map = HeaderMap::new();
                for (name, value) in headers {
                    if let Ok(value) = HeaderValue::from_str(&value) {
                        map.insert(name, value);
                    }
                }
                let status = StatusCode::from_u16(status)
                    .map_err(|e| TransportError::invalid_request_with_source("bad scripted status", e))?;
                Ok(HttpResponse::new(status, map, body, request.url().clone()))
            },
            Step::Fail(err) => Err(err),
        }
    }
}
