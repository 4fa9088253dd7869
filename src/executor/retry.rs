//! Retry policy shared by every external call.

use rand::RngExt;
use std::time::Duration;

/// Maximum number of attempts for transient failures.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Upper bound on a single backoff sleep in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Fraction of the delay randomised in either direction.
pub const DEFAULT_JITTER: f64 = 0.25;

/// Exponential backoff with bounded jitter.
///
/// The sleep after the n-th failed attempt is
/// `min(base * 2^(n-1), max) * (1 ± jitter * U[0,1))`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 0.0 disables jitter; 1.0 allows anything between 0 and twice the delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryPolicy {
    /// A policy that retries immediately. Intended for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Backoff before jitter after `failed_attempts` failures.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay);
        delay.min(self.max_delay)
    }

    /// Sleep duration after `failed_attempts` failures, jitter applied.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let backoff = self.backoff(failed_attempts);
        if self.jitter <= 0.0 || backoff.is_zero() {
            return backoff;
        }
        let factor = 1.0 + rand::rng().random_range(-self.jitter..self.jitter);
        backoff.mul_f64(factor.max(0.0))
    }
}
