use std::time::Duration;

use mediaforge_contracts::ProviderFailure;
use rand::Rng;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    pub const STOP: RetryDecision = RetryDecision {
        retry: false,
        delay: Duration::ZERO,
    };
}

/// Exponential backoff over retryable failures: `base * 2^attempt_index`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Extra random delay as a fraction of the computed delay; 0 disables jitter.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = fraction.clamp(0.0, 1.0);
        self
    }

    /// `attempt_index` is zero-based: the index of the attempt that just failed.
    pub fn should_retry(&self, failure: &ProviderFailure, attempt_index: u32) -> RetryDecision {
        should_retry(failure, attempt_index, self.max_attempts, self.backoff(attempt_index))
    }

    pub fn backoff(&self, attempt_index: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt_index.min(16));
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let extra = delay.mul_f64(rand::thread_rng().gen_range(0.0..=self.jitter));
        delay + extra
    }
}

/// Pure decision: retry only retryable failures while attempts remain.
pub fn should_retry(
    failure: &ProviderFailure,
    attempt_index: u32,
    max_attempts: u32,
    delay: Duration,
) -> RetryDecision {
    if !failure.is_retryable() {
        return RetryDecision::STOP;
    }
    if attempt_index.saturating_add(1) >= max_attempts {
        return RetryDecision::STOP;
    }
    RetryDecision { retry: true, delay }
}
