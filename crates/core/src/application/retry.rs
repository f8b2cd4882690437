// Backoff policy for executors
//
// The service never decides retries itself; executors typically delegate
// `retry_after_error_delay` to one of these.
use crate::domain::ActionContext;
use crate::port::RetryDecision;
use std::time::Duration;
use tracing::debug;

/// Default cap for exponential delays (5 minutes)
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

/// Retry delays derived from the retry index
///
/// delay = base_delay * (factor ^ retry_index), capped at `max_delay`,
/// with optional ±10% jitter. Gives up once `max_retries` retries were made.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    base_delay: Duration,
    factor: f64,
    max_retries: u32,
    max_delay: Duration,
    jitter: bool,
}

impl BackoffPolicy {
    /// Same delay before every retry
    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay: delay,
            factor: 1.0,
            max_retries,
            max_delay: delay,
            jitter: false,
        }
    }

    /// Exponential delays with jitter
    pub fn exponential(base_delay: Duration, factor: f64, max_retries: u32) -> Self {
        Self {
            base_delay,
            factor,
            max_retries,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
        }
    }

    /// Never retry
    pub fn never() -> Self {
        Self::fixed(Duration::ZERO, 0)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decide for a context that has just recorded a failure
    pub fn decide_for<P>(&self, context: &ActionContext<P>, seed: &str) -> RetryDecision {
        self.decide(context.retry_index(), seed)
    }

    /// Decide for the given retry index
    ///
    /// Jitter is seeded from `seed` (usually the action name) so that retries
    /// of different actions spread out while one action stays deterministic.
    pub fn decide(&self, retry_index: i32, seed: &str) -> RetryDecision {
        let index = u32::try_from(retry_index).unwrap_or(0);
        if index >= self.max_retries {
            debug!(
                retry_index = retry_index,
                max_retries = self.max_retries,
                "Retry budget exhausted"
            );
            return RetryDecision::GiveUp;
        }

        let exponent = i32::try_from(index).unwrap_or(i32::MAX);
        let mut delay_ms = self.base_delay.as_millis() as f64 * self.factor.powi(exponent);
        delay_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        if self.jitter {
            // Apply ±10% jitter to prevent "Thundering Herd" problem
            let jitter_seed = seed.chars().map(|c| c as u32).fold(0u32, u32::wrapping_add);
            let jitter_factor = 0.9 + ((jitter_seed % 21) as f64 / 100.0); // 0.9 to 1.1
            delay_ms *= jitter_factor;
        }

        RetryDecision::RetryAfter(Duration::from_millis(delay_ms.max(0.0) as u64))
    }
}
