//! Rate-limit-aware transport.
//!
//! Every outbound call goes through [`Transport::call`], which classifies each
//! attempt and decides whether to retry:
//!
//! - rate limited (HTTP 429 or `ratelimited`): wait `Retry-After` when given,
//!   otherwise exponential backoff with jitter; bounded by `max_attempts`
//! - transient (connect failure, timeout, dropped connection, 5xx, Slack's
//!   internal error codes): shorter backoff, bounded by `max_transient_attempts`
//! - fatal (auth, permission, not found, any other error code): surfaced at once
//!
//! Backoff sleeps and attempts abort on the cancellation token.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::config::RetryConfig;
use crate::errors::{SlackError, error_for_code};
use crate::slack::api::{ApiRequest, RawResponse, SendFailure, SendFailureKind, SlackApi};

const TRANSIENT_CODES: [&str; 4] = [
    "internal_error",
    "fatal_error",
    "service_unavailable",
    "request_timeout",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_transient_attempts: u32,
    pub transient_delay: Duration,
    pub max_delay: Duration,
    /// Randomise computed backoff. `Retry-After` waits are never jittered.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_transient_attempts: config.max_transient_attempts.max(1),
            transient_delay: Duration::from_millis(config.transient_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Backoff delays starting at `base`, doubling, capped at `max_delay`.
    fn backoff(&self, base: Duration) -> impl Iterator<Item = Duration> + use<> {
        let factor = u64::try_from(base.as_millis() / 2).unwrap_or(u64::MAX).max(1);
        let jittered = self.jitter;
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_delay)
            .map(move |d| if jittered { jitter(d) } else { d })
    }
}

/// How one attempt turned out.
#[derive(Debug)]
pub enum Outcome {
    Success(Value),
    RateLimited { retry_after: Option<Duration> },
    Transient(String),
    Fatal(SlackError),
}

/// Classify one attempt. Pure, so the whole retry table is unit-testable.
#[must_use]
pub fn classify(result: Result<RawResponse, SendFailure>, idempotent: bool) -> Outcome {
    let response = match result {
        Ok(response) => response,
        Err(failure) => {
            return match failure.kind {
                SendFailureKind::Connect => Outcome::Transient(failure.to_string()),
                SendFailureKind::Timeout | SendFailureKind::Dropped if idempotent => {
                    Outcome::Transient(failure.to_string())
                }
                SendFailureKind::Timeout | SendFailureKind::Dropped | SendFailureKind::Other => {
                    Outcome::Fatal(SlackError::HttpError(failure.message))
                }
            };
        }
    };

    match response.status {
        429 => {
            return Outcome::RateLimited {
                retry_after: response.retry_after,
            };
        }
        401 => return Outcome::Fatal(SlackError::AuthenticationFailure("invalid_auth".into())),
        403 => return Outcome::Fatal(SlackError::PermissionDenied("forbidden".into())),
        404 => return Outcome::Fatal(SlackError::NotFound("unknown API method".into())),
        500..=599 if idempotent => {
            return Outcome::Transient(format!("HTTP {}", response.status));
        }
        200..=299 => {}
        status => {
            return Outcome::Fatal(SlackError::ApiError {
                code: format!("http_{status}"),
            });
        }
    }

    let Some(body) = response.body else {
        return Outcome::Fatal(SlackError::ParseError(
            "response body is not JSON".to_string(),
        ));
    };
    if body.get("ok").and_then(Value::as_bool) == Some(true) {
        return Outcome::Success(body);
    }

    let code = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error")
        .to_string();
    match code.as_str() {
        "ratelimited" | "rate_limited" => Outcome::RateLimited {
            retry_after: response.retry_after,
        },
        c if idempotent && TRANSIENT_CODES.contains(&c) => Outcome::Transient(code),
        _ => Outcome::Fatal(error_for_code(&code)),
    }
}

/// Runs requests against a [`SlackApi`] under one retry policy and cancellation token.
#[derive(Clone)]
pub struct Transport {
    api: Arc<dyn SlackApi>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl Transport {
    #[must_use]
    pub fn new(api: Arc<dyn SlackApi>, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            api,
            policy,
            cancel,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fail with `Cancelled` once the token fires.
    ///
    /// # Errors
    ///
    /// `Cancelled` if cancellation was requested.
    pub fn check_cancelled(&self) -> Result<(), SlackError> {
        if self.cancel.is_cancelled() {
            Err(SlackError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn sleep(&self, delay: Duration) -> Result<(), SlackError> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(SlackError::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Call a Web API method, retrying per policy, and return the `ok: true` body.
    ///
    /// # Errors
    ///
    /// `RateLimitExceeded` / `TransientFailure` when the retry budget runs out,
    /// `Cancelled` on cancellation, or the fatal error Slack reported.
    pub async fn call(&self, request: &ApiRequest) -> Result<Value, SlackError> {
        let mut rate_backoff = self.policy.backoff(self.policy.base_delay);
        let mut transient_backoff = self.policy.backoff(self.policy.transient_delay);
        let mut rate_limited_attempts = 0u32;
        let mut transient_attempts = 0u32;
        let mut attempt = 0u32;

        loop {
            self.check_cancelled()?;
            let result = tokio::select! {
                () = self.cancel.cancelled() => return Err(SlackError::Cancelled),
                result = self.api.send(request, attempt) => result,
            };
            attempt += 1;

            let delay = match classify(result, request.idempotent) {
                Outcome::Success(body) => {
                    debug!(method = %request.method, attempts = attempt, "Slack call succeeded");
                    return Ok(body);
                }
                Outcome::Fatal(error) => return Err(error),
                Outcome::RateLimited { retry_after } => {
                    rate_limited_attempts += 1;
                    if rate_limited_attempts >= self.policy.max_attempts {
                        return Err(SlackError::RateLimitExceeded {
                            attempts: rate_limited_attempts,
                        });
                    }
                    let computed = rate_backoff.next().unwrap_or(self.policy.max_delay);
                    let delay = retry_after.unwrap_or(computed);
                    warn!(
                        method = %request.method,
                        attempt = rate_limited_attempts,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Slack rate limited, waiting before retry"
                    );
                    delay
                }
                Outcome::Transient(reason) => {
                    transient_attempts += 1;
                    if transient_attempts >= self.policy.max_transient_attempts {
                        return Err(SlackError::TransientFailure {
                            attempts: transient_attempts,
                            reason,
                        });
                    }
                    let delay = transient_backoff
                        .next()
                        .unwrap_or(self.policy.max_delay);
                    warn!(
                        method = %request.method,
                        attempt = transient_attempts,
                        max_attempts = self.policy.max_transient_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        reason = %reason,
                        "Transient Slack failure, retrying"
                    );
                    delay
                }
            };
            self.sleep(delay).await?;
        }
    }
}
