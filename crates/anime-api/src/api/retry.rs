//! One logical GET with retries for transient failures.
//!
//! | Outcome          | Action                                              |
//! |------------------|-----------------------------------------------------|
//! | 2xx              | parse JSON, done                                    |
//! | 429              | back off and retry; `RateLimited` once exhausted    |
//! | 5xx              | back off and retry; `ServerError` once exhausted    |
//! | other 4xx        | `ClientError` immediately                           |
//! | transport error  | back off and retry; `NetworkFailure` once exhausted |
//!
//! Attempts are numbered from 1. An attempt numbered above `max_retries`
//! that still fails is terminal, so `max_retries = 3` allows four attempts.

use super::error::ApiError;
use super::transport::{HttpResponse, Transport};
use rand::Rng;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

/// Retry and backoff settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum retries after the first attempt
    pub max_retries: u32,
    /// Backoff before retry `n` is `base_delay * 2^(n-1)` plus jitter
    pub base_delay: Duration,
    /// Upper bound of the uniform random jitter
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_jitter: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Exponential part of the backoff after a failed `attempt`.
    ///
    /// Growth stops at `base_delay * 2^16`; later attempts reuse that delay.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        // Keeps the shift in range for large `max_retries`
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }

    /// Full backoff after a failed `attempt`, jitter included
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.base_backoff(attempt) + jitter
    }

    fn exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_retries
    }
}

/// Result of interpreting one attempt
enum Attempt {
    Done(Value),
    Retry(ApiError),
    Fail(ApiError),
}

fn classify(url: &str, attempt: u32, response: HttpResponse) -> Attempt {
    let status = response.status;

    if status.is_success() {
        return match serde_json::from_str(&response.body) {
            Ok(value) => Attempt::Done(value),
            Err(e) => Attempt::Fail(ApiError::decode(url, e)),
        };
    }

    let message = status
        .canonical_reason()
        .unwrap_or("Unknown status")
        .to_string();
    let body = Some(response.body).filter(|b| !b.is_empty());

    if status == StatusCode::TOO_MANY_REQUESTS {
        Attempt::Retry(ApiError::RateLimited {
            message,
            url: url.to_string(),
            status: status.as_u16(),
            attempt,
        })
    } else if status.is_server_error() {
        Attempt::Retry(ApiError::ServerError {
            message,
            url: url.to_string(),
            status: status.as_u16(),
            attempt,
            body,
        })
    } else {
        Attempt::Fail(ApiError::ClientError {
            message,
            url: url.to_string(),
            status: status.as_u16(),
            attempt,
            body,
        })
    }
}

/// Fetch `url` and parse its JSON body, retrying transient failures
pub async fn fetch_json(
    transport: &dyn Transport,
    url: &Url,
    policy: &RetryPolicy,
) -> Result<Value, ApiError> {
    let url_str = url.as_str();
    let mut attempt = 1;

    loop {
        debug!(url = %url, attempt = attempt, "Making API request");

        let outcome = match transport.get(url).await {
            Ok(response) => classify(url_str, attempt, response),
            Err(e) => Attempt::Retry(ApiError::NetworkFailure {
                message: e.to_string(),
                url: url_str.to_string(),
                attempt,
            }),
        };

        let err = match outcome {
            Attempt::Done(value) => {
                debug!(url = %url, attempt = attempt, "Request successful");
                return Ok(value);
            }
            Attempt::Fail(err) => {
                warn!(url = %url, error = %err, "Request failed");
                return Err(err);
            }
            Attempt::Retry(err) => err,
        };

        if policy.exhausted(attempt) {
            warn!(url = %url, attempts = attempt, error = %err, "Retries exhausted");
            return Err(err);
        }

        let delay = policy.backoff(attempt);
        warn!(
            url = %url,
            attempt = attempt,
            status = ?err.status(),
            delay_ms = delay.as_millis(),
            "Transient failure, retrying after delay"
        );
        sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::transport::stub::StubTransport;
    use serde_json::json;
    use tokio::time::Instant;

    fn url() -> Url {
        Url::parse("https://api.jikan.moe/v4/anime/1?sfw=true").unwrap()
    }

    #[test]
    fn test_backoff_growth_and_jitter_bounds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.base_backoff(2), Duration::from_millis(2000));
        assert_eq!(policy.base_backoff(3), Duration::from_millis(4000));
        assert_eq!(policy.base_backoff(17), Duration::from_millis(1000 << 16));
        assert_eq!(policy.base_backoff(40), policy.base_backoff(17));

        for attempt in 1..=3 {
            for _ in 0..50 {
                let delay = policy.backoff(attempt);
                assert!(delay >= policy.base_backoff(attempt));
                assert!(delay <= policy.base_backoff(attempt) + policy.max_jitter);
            }
        }
    }

    #[test]
    fn test_zero_jitter() {
        let policy = RetryPolicy {
            max_jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let stub = StubTransport::new().respond(200, r#"{"data": {"mal_id": 1}}"#);

        let value = fetch_json(&stub, &url(), &RetryPolicy::default())
            .await
            .unwrap();

        assert_eq!(value, json!({"data": {"mal_id": 1}}));
        assert_eq!(stub.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_then_success_on_fourth_attempt() {
        let stub = StubTransport::new()
            .respond(429, "")
            .respond(429, "")
            .respond(429, "")
            .respond(200, r#"{"ok": true}"#);
        let start = Instant::now();

        let value = fetch_json(&stub, &url(), &RetryPolicy::default())
            .await
            .unwrap();

        assert_eq!(value, json!({"ok": true}));
        assert_eq!(stub.call_count(), 4);
        // 1000 + 2000 + 4000 plus up to 500ms jitter each
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(7000));
        assert!(elapsed <= Duration::from_millis(8500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_exhausts_after_four_attempts() {
        let stub = StubTransport::new().respond(429, "Too Many Requests");

        let err = fetch_json(&stub, &url(), &RetryPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::RateLimited { attempt: 4, status: 429, .. }));
        assert_eq!(stub.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_exhausted_keeps_body() {
        let stub = StubTransport::new().respond(503, "upstream down");

        let err = fetch_json(&stub, &url(), &RetryPolicy::default())
            .await
            .unwrap_err();

        match err {
            ApiError::ServerError {
                status,
                attempt,
                body,
                ..
            } => {
                assert_eq!(status, 503);
                assert_eq!(attempt, 4);
                assert_eq!(body.as_deref(), Some("upstream down"));
            }
            other => panic!("expected ServerError, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_404_fails_immediately_without_backoff() {
        let stub = StubTransport::new().respond(404, r#"{"status":404,"message":"Not Found"}"#);
        let start = Instant::now();

        let err = fetch_json(&stub, &url(), &RetryPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::ClientError { status: 404, attempt: 1, .. }));
        assert!(err.body().unwrap().contains("Not Found"));
        assert_eq!(stub.call_count(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_recovers() {
        let stub = StubTransport::new()
            .fail("connection reset by peer")
            .respond(200, "[]");

        let value = fetch_json(&stub, &url(), &RetryPolicy::default())
            .await
            .unwrap();

        assert_eq!(value, json!([]));
        assert_eq!(stub.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_exhausted() {
        let stub = StubTransport::new().fail("dns error");
        let policy = RetryPolicy {
            max_retries: 1,
            ..RetryPolicy::default()
        };

        let err = fetch_json(&stub, &url(), &policy).await.unwrap_err();

        assert!(matches!(err, ApiError::NetworkFailure { attempt: 2, .. }));
        assert!(err.to_string().contains("dns error"));
        assert_eq!(stub.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_not_rewrapped() {
        // A 5xx followed by a 400: the client error surfaces as-is
        let stub = StubTransport::new().respond(500, "").respond(400, "bad query");

        let err = fetch_json(&stub, &url(), &RetryPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::ClientError { status: 400, attempt: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_json_is_decode_error() {
        let stub = StubTransport::new().respond(200, "<html>maintenance</html>");

        let err = fetch_json(&stub, &url(), &RetryPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Decode { .. }));
        assert_eq!(stub.call_count(), 1);
    }
}
