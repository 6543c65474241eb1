//! Retry logic for connection failures and throttled responses.
//!
//! Two independent policies live here:
//!
//! - [`with_connection_retry`] wraps a single round trip. Connection
//!   failures and connection resets are retried, each class with its own
//!   budget of `max_retries`, sleeping `initial_backoff * 2^attempt`
//!   (capped at `max_backoff`). These sleeps are plain `tokio` sleeps and
//!   cannot be cancelled once started.
//! - [`with_throttle_retry`] wraps a whole operation and retries HTTP 429
//!   answers, sleeping `throttle_backoff * 2^attempt` (capped at
//!   `max_throttle_backoff`). These sleeps race a [`CancellationToken`].
//!
//! DNS failures are never retried.

use std::{future::Future, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    config::RetryConfig,
    error::{Result, TransportError},
};

/// Which failure class a connection retry is spending budget on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureClass {
    Connect,
    Reset,
}

impl FailureClass {
    fn of(err: &TransportError) -> Option<Self> {
        match err {
            TransportError::Connection { .. } => Some(Self::Connect),
            TransportError::ConnectionReset { .. } => Some(Self::Reset),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connection failure",
            Self::Reset => "connection reset",
        }
    }
}

/// Executes `operation` with retry on connection-level failures.
///
/// `operation` receives the zero-based attempt number.
///
/// # Errors
///
/// - Non-retryable errors (DNS, status, invalid request) are returned
///   immediately.
/// - When a class's budget is spent, returns
///   [`TransportError::RetriesExhausted`] wrapping the last cause.
pub(crate) async fn with_connection_retry<F, Fut, T>(
    config: &RetryConfig,
    request_id: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut connect_retries = 0u32;
    let mut reset_retries = 0u32;
    let mut attempt = 0u32;

    loop {
        let err = match operation(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(request_id, attempt = attempt + 1, "request succeeded after retry");
                }
                return Ok(value);
            },
            Err(err) => err,
        };
        attempt += 1;

        let Some(class) = FailureClass::of(&err) else {
            return Err(err);
        };
        let spent = match class {
            FailureClass::Connect => &mut connect_retries,
            FailureClass::Reset => &mut reset_retries,
        };

        if *spent >= config.max_retries {
            tracing::warn!(
                request_id,
                attempts = attempt,
                failure = class.as_str(),
                error = %err,
                "connection retries exhausted",
            );
            return Err(TransportError::RetriesExhausted { attempts: attempt, last: Box::new(err) });
        }

        let delay = compute_backoff(config.initial_backoff, config.max_backoff, *spent);
        *spent += 1;
        tracing::debug!(
            request_id,
            retry = *spent,
            max_retries = config.max_retries,
            failure = class.as_str(),
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying request after backoff",
        );
        tokio::time::sleep(delay).await;
    }
}

/// Executes `operation`, retrying HTTP 429 answers with cancellable backoff.
///
/// Any error other than [`TransportError::Throttled`] is returned
/// immediately. Once `max_retries` throttled answers have been retried, the
/// last one is returned.
///
/// # Errors
///
/// Returns [`TransportError::Cancelled`] (carrying the throttle error) if
/// `cancel` fires during a backoff wait.
///
/// # Example
///
/// ```no_run
/// use hwcloud_transport::{RetryConfig, TransportError, with_throttle_retry};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), TransportError> {
/// let config = RetryConfig::default();
/// let cancel = CancellationToken::new();
/// let body = with_throttle_retry(&config, &cancel, "list-servers", || async {
///     Ok::<_, TransportError>("{}".to_owned())
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
#[tracing::instrument(skip(config, cancel, operation), fields(max_retries = config.max_retries))]
pub async fn with_throttle_retry<F, Fut, T>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_throttled() && retries < config.max_retries => {
                let delay =
                    compute_backoff(config.throttle_backoff, config.max_throttle_backoff, retries);
                retries += 1;
                tracing::warn!(
                    operation = operation_name,
                    retry = retries,
                    delay_secs = delay.as_secs(),
                    "received too many requests response, backing off",
                );
                tokio::select! {
                    () = tokio::time::sleep(delay) => {},
                    () = cancel.cancelled() => {
                        tracing::debug!(operation = operation_name, "throttle backoff cancelled");
                        return Err(TransportError::Cancelled { last: Some(Box::new(err)) });
                    },
                }
            },
            Err(err) => return Err(err),
        }
    }
}

/// Computes `base * 2^attempt`, capped at `max`.
pub(crate) fn compute_backoff(base: Duration, max: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX)).min(max)
}
