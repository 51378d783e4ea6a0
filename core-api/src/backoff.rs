//! Retry delays and retry eligibility.
//!
//! `delay(n)` is `min(base * 2^n, max)` with ±10% jitter:
//!
//! ```text
//! exp   = min(base * 2^attempt, max)
//! delay = floor(exp + exp * 0.2 * (rand() - 0.5))
//! ```

use crate::error::ApiError;
use bridge_traits::http::HttpMethod;
use core_runtime::config::ApiConfig;
use rand::Rng;
use std::time::Duration;

/// Jittered exponential delay for `attempt` (0-based) using the thread RNG.
pub fn delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    delay_with_rng(attempt, base, max, &mut rand::thread_rng())
}

/// Same as [`delay`] with an explicit RNG, for reproducible sequences.
pub fn delay_with_rng<R: Rng + ?Sized>(
    attempt: u32,
    base: Duration,
    max: Duration,
    rng: &mut R,
) -> Duration {
    let exp = exponential_ms(attempt, base, max);
    let jitter = exp * 0.2 * (rng.gen::<f64>() - 0.5);
    let millis = (exp + jitter).floor().max(0.0);
    Duration::from_millis(millis as u64)
}

/// `min(base * 2^attempt, max)` in milliseconds, before jitter.
pub fn exponential_ms(attempt: u32, base: Duration, max: Duration) -> f64 {
    let base_ms = base.as_millis() as f64;
    let max_ms = max.as_millis() as f64;
    // 2^64 already exceeds any sane max; keep powi from overflowing to inf
    let factor = 2f64.powi(attempt.min(64) as i32);
    (base_ms * factor).min(max_ms)
}

/// When and how long the orchestrator waits before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ApiConfig) -> Self {
        Self {
            max_attempts: config.max_retry_attempts,
            base_delay: config.retry_base_delay,
            max_delay: config.retry_max_delay,
        }
    }

    /// Mutations are never retried.
    pub fn should_retry(&self, method: HttpMethod, error: &ApiError, retry_count: u32) -> bool {
        method == HttpMethod::Get && retry_count < self.max_attempts && error.is_retryable()
    }

    pub fn delay_for(&self, retry_count: u32) -> Duration {
        delay(retry_count, self.base_delay, self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}
