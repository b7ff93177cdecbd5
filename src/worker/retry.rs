//! Exponential backoff for redelivering jobs that failed transiently.
//!
//! A failed invocation changes no watermark, so redelivering the same job is
//! always safe. Only retryable errors are redelivered; configuration errors
//! are dropped immediately.
//!
//! - Default: 5 retries with 2s, 4s, 8s, 16s, 32s delays, capped at 60s

use std::time::Duration;

/// Configuration for exponential backoff retry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of redeliveries (not including the initial attempt).
    pub max_retries: u32,

    /// Delay before the first redelivery.
    pub initial_delay: Duration,

    /// Maximum delay between redeliveries.
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (typically 2.0).
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    pub const DEFAULT: Self = Self {
        max_retries: 5,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(60),
        backoff_multiplier: 2.0,
    };

    /// Never redeliver.
    pub const NONE: Self = Self {
        max_retries: 0,
        ..Self::DEFAULT
    };

    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Computes the delay for the given retry (0-indexed).
    ///
    /// `initial_delay * backoff_multiplier^retry`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(retry as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped_secs)
    }

    /// Delay before redelivering a job whose delivery `attempt` just failed,
    /// or `None` once retries are exhausted.
    ///
    /// `attempt` is 0 for the first delivery.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_retries).then(|| self.delay_for_attempt(attempt))
    }

    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|attempt| self.delay_for_attempt(attempt))
    }

    /// Total wait across all redeliveries.
    pub fn total_max_wait(&self) -> Duration {
        self.delays().sum()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
