//! # Retry policy for worker reconnects.
//!
//! [`RetryPolicy`] bundles every knob of a worker's reconnect state machine:
//!
//! - `max_retries` consecutive failures before the exhaustion policy applies;
//! - `max_retry_delay_secs` cap of the exponential backoff;
//! - `max_failure_duration_secs` circuit breaker window;
//! - `on_exhausted` what happens when `max_retries` is reached.
//!
//! ## Precedence
//! ```text
//! connect fails
//!   ├─► now - first_failure >= max_failure_duration ─► terminate (circuit open)
//!   └─► retry_count >= max_retries
//!         ├─ ExhaustionPolicy::Terminate ─► terminate
//!         └─ ExhaustionPolicy::Cooldown  ─► retry_count = 0, delay = max_retry_delay
//! ```
//! The failure-duration breaker wins over the count: a long string of failures is
//! fatal even if the count never reaches `max_retries`.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::policies::BackoffPolicy;

/// What a worker does once it has failed `max_retries` times in a row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Terminate the worker.
    Terminate,
    /// Reset the count and keep retrying at the maximum delay (default).
    #[default]
    Cooldown,
}

/// Reconnect policy of one worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Consecutive failures before `on_exhausted` applies (min 1).
    pub max_retries: u32,
    /// Backoff cap in seconds (min 1).
    pub max_retry_delay_secs: u64,
    /// Circuit breaker window in seconds (min 1).
    pub max_failure_duration_secs: u64,
    /// Behavior when `max_retries` is reached.
    pub on_exhausted: ExhaustionPolicy,
}

impl Default for RetryPolicy {
    /// - `max_retries = 10`
    /// - `max_retry_delay = 60s`
    /// - `max_failure_duration = 1h`
    /// - `on_exhausted = Cooldown`
    fn default() -> Self {
        Self {
            max_retries: 10,
            max_retry_delay_secs: 60,
            max_failure_duration_secs: 3600,
            on_exhausted: ExhaustionPolicy::Cooldown,
        }
    }
}

impl RetryPolicy {
    /// Backoff cap.
    #[inline]
    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_secs(self.max_retry_delay_secs)
    }

    /// Circuit breaker window.
    #[inline]
    pub fn max_failure_duration(&self) -> Duration {
        Duration::from_secs(self.max_failure_duration_secs)
    }

    /// Whether reaching `max_retries` terminates the worker.
    #[inline]
    pub fn terminates_on_exhaustion(&self) -> bool {
        self.on_exhausted == ExhaustionPolicy::Terminate
    }

    /// Doubling backoff capped at [`max_retry_delay`](Self::max_retry_delay).
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::doubling(self.max_retry_delay())
    }

    /// Rejects values the state machine cannot work with.
    ///
    /// # Example
    /// ```
    /// use brokervisor::RetryPolicy;
    ///
    /// let mut policy = RetryPolicy::default();
    /// assert!(policy.validate().is_ok());
    ///
    /// policy.max_retries = 0;
    /// assert!(policy.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::invalid("max_retries", "must be at least 1"));
        }
        if self.max_retry_delay_secs == 0 {
            return Err(ConfigError::invalid(
                "max_retry_delay_secs",
                "must be at least 1 second",
            ));
        }
        if self.max_failure_duration_secs == 0 {
            return Err(ConfigError::invalid(
                "max_failure_duration_secs",
                "must be at least 1 second",
            ));
        }
        Ok(())
    }
}
