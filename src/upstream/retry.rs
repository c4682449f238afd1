// Nuclino MCP — Retry with exponential backoff
//
// Wraps one upstream operation and re-runs it while it fails with a
// retryable error, sleeping between attempts with a capped exponential
// delay.

use std::future::Future;
use std::time::Duration;

use super::error::UpstreamError;

/// Backoff settings for a [`RetryHandler`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            backoff_factor: 2.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryHandler {
    config: RetryConfig,
}

impl RetryHandler {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or `max_retries + 1` attempts have been made.
    ///
    /// The surfaced error is always `UpstreamError::Failed`, labelled with
    /// `label` and wrapping the last failure.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= self.config.max_retries {
                return Err(UpstreamError::Failed {
                    operation: label.to_string(),
                    attempts: attempt + 1,
                    source: Box::new(error),
                });
            }

            let delay = self.calculate_delay(attempt);
            tracing::warn!(
                operation = label,
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Upstream call failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Delay before retrying after failed attempt `attempt` (0-indexed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.config.base_delay.as_millis() as f64;
        let max_ms = self.config.max_delay.as_millis() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = (base_ms * self.config.backoff_factor.powi(exponent)).min(max_ms);
        Duration::from_millis(delay_ms as u64)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
