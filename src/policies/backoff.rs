//! # Backoff policy for reconnect attempts.
//!
//! [`BackoffPolicy`] controls how the wait between reconnect attempts grows after
//! repeated failures. It is parameterized by:
//! - [`BackoffPolicy::first`] the delay after the first failure;
//! - [`BackoffPolicy::factor`] the multiplicative growth factor;
//! - [`BackoffPolicy::max`] the maximum delay cap.
//!
//! The delay after failure `n` (1-based) is `first × factor^(n-1)`, clamped to `max`.
//! The base is derived purely from the failure number, so a delay never depends on
//! the previous one.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use brokervisor::BackoffPolicy;
//!
//! let backoff = BackoffPolicy::doubling(Duration::from_secs(60));
//!
//! assert_eq!(backoff.delay_after(1), Duration::from_secs(1));
//! assert_eq!(backoff.delay_after(2), Duration::from_secs(2));
//! assert_eq!(backoff.delay_after(6), Duration::from_secs(32));
//! // 2^6 = 64s → capped at max=60s
//! assert_eq!(backoff.delay_after(7), Duration::from_secs(60));
//! ```

use std::time::Duration;

/// Reconnect backoff policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub first: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
}

impl Default for BackoffPolicy {
    /// Returns [`BackoffPolicy::doubling`] capped at 60s.
    fn default() -> Self {
        Self::doubling(Duration::from_secs(60))
    }
}

impl BackoffPolicy {
    /// `1s, 2s, 4s, …` capped at `max`.
    pub fn doubling(max: Duration) -> Self {
        Self {
            first: Duration::from_secs(1),
            max,
            factor: 2.0,
        }
    }

    /// Computes the delay that follows failure number `failures` (1-based).
    ///
    /// `failures == 0` is treated like the first failure.
    ///
    /// # Notes
    /// - If `factor` equals 1.0, delay remains constant at `first` (up to `max`).
    /// - If `factor` is greater than 1.0, delays grow exponentially up to `max`.
    /// - Overflowing or non-finite intermediate values clamp to `max`.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let max_secs = self.max.as_secs_f64();
        let unclamped_secs = self.first.as_secs_f64() * self.factor.powi(exp);

        if !unclamped_secs.is_finite() || unclamped_secs < 0.0 || unclamped_secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(unclamped_secs)
        }
    }
}
