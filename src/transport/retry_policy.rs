use std::future::Future;
use std::time::Duration;

use crate::config::RelayConfig;
use crate::error::RelayError;

pub(crate) const RETRY_MAX_ATTEMPTS: u32 = 3;
pub(crate) const RETRY_BACKOFF_BASE_MS: u64 = 500;

/// Bounded exponential backoff for opening model streams.
///
/// Only rate-limit errors are retried; every other error propagates on the
/// first failure. Retries are not deduplicated, so a retried call may be
/// billed more than once upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            RETRY_MAX_ATTEMPTS,
            Duration::from_millis(RETRY_BACKOFF_BASE_MS),
        )
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            config.retry_max_attempts,
            Duration::from_millis(config.retry_base_delay_ms),
        )
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait before the attempt following failed attempt number `attempt` (1-based).
    #[inline]
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1_u32 << shift)
    }

    /// Run `op` until it succeeds, fails without a rate-limit signal, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns the first non-rate-limit error, or the last rate-limit error
    /// once attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RelayError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RelayError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_rate_limited() && attempt < self.max_attempts => {
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        operation = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "rate limited by upstream, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_rate_limited() {
                        tracing::warn!(
                            operation = label,
                            attempts = attempt,
                            "rate limit retries exhausted"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}
