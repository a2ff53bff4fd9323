//! Retry configuration and backoff.

use crate::error::TransportError;
use rand::Rng;
use std::collections::BTreeSet;
use std::time::Duration;

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Whether failed attempts are re-issued at all.
    pub enabled: bool,
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound of the random jitter added to every delay.
    pub jitter_max: Duration,
    /// Status codes that should trigger a retry.
    pub retryable_status_codes: BTreeSet<u16>,
    /// Cap on the exponential part of the delay.
    pub max_delay: Duration,
    /// Wait at least as long as a 429's `Retry-After` asks for.
    pub respect_retry_after: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            jitter_max: Duration::from_millis(100),
            retryable_status_codes: [408, 429, 500, 502, 503, 504].into_iter().collect(),
            max_delay: Duration::from_secs(30),
            respect_retry_after: true,
        }
    }
}

impl RetryConfig {
    /// Create a retry config with exponential backoff.
    pub fn exponential(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Default::default()
        }
    }

    /// A config that never retries.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Replace the retryable status codes.
    pub fn with_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    /// Set the jitter upper bound.
    pub fn with_jitter(mut self, jitter_max: Duration) -> Self {
        self.jitter_max = jitter_max;
        self
    }

    /// Set the cap on the exponential delay.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Ignore `Retry-After` when computing delays.
    pub fn ignore_retry_after(mut self) -> Self {
        self.respect_retry_after = false;
        self
    }

    /// Check if a status code should trigger a retry.
    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }
}

/// Stateless backoff calculator.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from a config.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Get the config.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before retry number `attempt` (1-based), or `None` once retries
    /// are exhausted.
    ///
    /// `base_delay * 2^(attempt-1) + uniform(0, jitter_max)`.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if !self.config.enabled || attempt == 0 || attempt > self.config.max_retries {
            return None;
        }

        let factor = 2u32.saturating_pow(attempt - 1);
        let backoff = self
            .config
            .base_delay
            .saturating_mul(factor)
            .min(self.config.max_delay);

        Some(backoff + self.jitter())
    }

    fn jitter(&self) -> Duration {
        let max = self.config.jitter_max.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max))
    }

    /// Whether a transport failure may be retried.
    pub fn is_retryable_error(&self, error: &TransportError) -> bool {
        self.config.enabled && error.is_io()
    }

    /// Whether a response status may be retried.
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.config.enabled && self.config.should_retry_status(status)
    }

    /// Delay before retrying a response, honouring `Retry-After` if asked to.
    pub fn delay_for_status(
        &self,
        attempt: u32,
        retry_after: Option<Duration>,
    ) -> Option<Duration> {
        let delay = self.delay(attempt)?;
        match retry_after {
            Some(hint) if self.config.respect_retry_after => {
                Some(delay.max(hint.min(self.config.max_delay)))
            }
            _ => Some(delay),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
