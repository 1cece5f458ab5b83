//! Retry-on-429 wrapper for backend calls

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{BackoffKind, RetryConfig};
use crate::error::Result;
use crate::time::Sleeper;

/// Delay growth between rate-limited attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base + attempt * increment`
    Linear { base: Duration, increment: Duration },
    /// `2^(attempt + 1) * unit`
    Exponential { unit: Duration },
}

impl Backoff {
    /// Delay after the zero-based `attempt` was rate limited
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Linear { base, increment } => {
                base.saturating_add(increment.saturating_mul(attempt))
            }
            Backoff::Exponential { unit } => {
                let factor = 2u32.saturating_pow(attempt.saturating_add(1));
                unit.saturating_mul(factor)
            }
        }
    }
}

/// How many times to call and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls, including the first
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        let backoff = match config.backoff {
            BackoffKind::Linear => Backoff::Linear {
                base: Duration::from_millis(config.base_delay_ms),
                increment: Duration::from_millis(config.increment_ms),
            },
            BackoffKind::Exponential => Backoff::Exponential {
                unit: Duration::from_millis(config.unit_ms),
            },
        };

        Self {
            max_attempts: config.max_attempts.max(1),
            backoff,
        }
    }
}

impl RetryPolicy {
    /// Run `operation`, retrying while it reports a rate limit.
    ///
    /// Non rate-limit errors are returned immediately. The error of the last
    /// permitted attempt is returned as is.
    pub async fn run<T, F, Fut>(&self, sleeper: &dyn Sleeper, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempts = attempt + 1, "Call succeeded after rate limiting");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_rate_limited() && attempt + 1 < self.max_attempts => {
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    sleeper.sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
