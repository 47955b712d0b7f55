//! Bounded exponential backoff for external calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{LlmError, SourceError};

/// Errors that may clear up on their own.
pub trait Transient {
    /// Whether a retry could plausibly succeed.
    fn is_transient(&self) -> bool;

    /// Server-provided delay hint.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Transient for LlmError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Unavailable { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl Transient for SourceError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Unreachable { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Retry policy: `max_attempts` total tries, delays doubling from `base_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        E: Transient + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let backoff = e
                        .retry_after()
                        .map(|hint| hint.min(self.max_delay))
                        .unwrap_or_else(|| self.delay_for(attempt));
                    let jitter_cap = (backoff.as_millis() as u64) / 4;
                    let jitter = if jitter_cap > 0 {
                        rand::thread_rng().gen_range(0..=jitter_cap)
                    } else {
                        0
                    };
                    let delay = backoff + Duration::from_millis(jitter);
                    debug!(
                        call = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(call = label, attempts = attempt, error = %e, "Retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}
