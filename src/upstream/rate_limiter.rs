// Nuclino MCP — Sliding-window rate limiter
//
// Keeps the timestamps of recent calls and suspends callers until one
// more call fits inside the quota. Each upstream client owns its own
// limiter, so pacing is per credential.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Extra wait added after the oldest call leaves the window.
const SAFETY_MARGIN: Duration = Duration::from_millis(100);

/// Quota settings for a [`RateLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum calls allowed inside one window.
    pub max_requests: usize,
    /// Length of the sliding window.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 150,
            window: Duration::from_secs(60),
        }
    }
}

/// Sliding-window limiter over a single credential's call history.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            calls: Mutex::new(VecDeque::with_capacity(config.max_requests)),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Wait until one more call fits in the window, then record it.
    ///
    /// Never fails. The quota is re-checked after every sleep because
    /// other callers may have taken the freed slot in the meantime.
    pub async fn wait_for_slot(&self) {
        loop {
            let wait = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                self.prune(&mut calls, now);

                if calls.len() < self.config.max_requests {
                    calls.push_back(now);
                    return;
                }

                match calls.front() {
                    Some(oldest) => {
                        (*oldest + self.config.window).saturating_duration_since(now)
                            + SAFETY_MARGIN
                    }
                    // max_requests == 0: nothing will ever age out, so
                    // back off for a full window before checking again.
                    None => self.config.window + SAFETY_MARGIN,
                }
            };

            tracing::debug!(
                wait_ms = wait.as_millis() as u64,
                max_requests = self.config.max_requests,
                "Rate limit reached, waiting for a free slot"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of calls currently inside the window.
    pub async fn request_count(&self) -> usize {
        let mut calls = self.calls.lock().await;
        self.prune(&mut calls, Instant::now());
        calls.len()
    }

    fn prune(&self, calls: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = calls.front() {
            if now.duration_since(*oldest) >= self.config.window {
                calls.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
