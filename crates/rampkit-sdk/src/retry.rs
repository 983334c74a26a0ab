//! Retry with exponential backoff for remote reads.

use std::future::Future;
use std::time::Duration;

use rampkit_core::{RampError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How often and how patiently to retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on each later one.
    pub base_delay_ms: u64,

    /// Limit on each individual attempt.
    pub timeout_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            timeout_ms: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            timeout_ms: None,
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Per-attempt limit.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Delay before retry number `attempt + 1`.
    ///
    /// Rate-limited failures get up to `base_delay_ms` of random jitter on top.
    pub fn backoff(&self, attempt: u32, error: &RampError) -> Duration {
        let exponential = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(20));
        let jitter = match error {
            RampError::RateLimited { .. } if self.base_delay_ms > 0 => {
                rand::thread_rng().gen_range(0..=self.base_delay_ms)
            }
            _ => 0,
        };
        Duration::from_millis(exponential.saturating_add(jitter))
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget runs out. The last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let result = match policy.timeout() {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result,
                Err(_) => Err(RampError::Network(format!(
                    "attempt timed out after {}ms",
                    limit.as_millis()
                ))),
            },
            None => operation().await,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                let delay = policy.backoff(attempt, &err);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Map a non-success HTTP status to an error.
pub fn classify_status(status: u16, message: impl Into<String>) -> RampError {
    match status {
        429 => RampError::RateLimited { status },
        _ => RampError::Http {
            status,
            message: message.into(),
        },
    }
}

/// Map a `reqwest` failure to an error.
pub fn classify_reqwest(err: reqwest::Error) -> RampError {
    match err.status() {
        Some(status) => classify_status(status.as_u16(), err.to_string()),
        None if err.is_decode() => RampError::Serialization(err.to_string()),
        None => RampError::Network(err.to_string()),
    }
}
