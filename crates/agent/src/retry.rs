//! Exponential backoff with jitter for transient failures.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use veritas_config::RetryConfig;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff plus uniform jitter in `[0, backoff / 2]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        let half = (backoff.as_millis() / 2) as u64;
        let jitter = if half == 0 {
            0
        } else {
            rand::rng().random_range(0..=half)
        };
        backoff + Duration::from_millis(jitter)
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    /// Returns the final result and how many attempts were made.
    pub async fn run<T, E, F, Fut>(&self, mut op: F, is_transient: impl Fn(&E) -> bool) -> (Result<T, E>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            let result = op().await;
            attempt += 1;
            match result {
                Err(e) if is_transient(&e) && attempt <= self.max_retries => {
                    let delay = self.delay(attempt - 1);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "Transient failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                other => return (other, attempt),
            }
        }
    }
}
