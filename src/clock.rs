//! # Wall-clock source for backoff, circuit breaking and memory grace periods.
//!
//! Every time-based decision in the supervisor reads `now` through a [`Clock`].
//! Production code uses [`SystemClock`]; tests and simulations use [`ManualClock`]
//! and advance it explicitly instead of sleeping.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Shared clock handle.
pub type ClockRef = Arc<dyn Clock>;

/// Reads the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock.
///
/// Cloning yields a handle to the same instant, so a test can keep one clone and
/// hand another to the component under test.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use brokervisor::{Clock, ManualClock};
///
/// let clock = ManualClock::default();
/// let start = clock.now();
/// clock.advance(Duration::from_secs(3));
/// assert_eq!((clock.now() - start).num_seconds(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = now.checked_add_signed(delta).unwrap_or(*now);
    }

    /// Jumps the clock to `at`.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }
}

impl Default for ManualClock {
    /// Starts at the current system time.
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Returns `true` once at least `window` has passed between `since` and `now`.
///
/// A `since` later than `now` counts as "not elapsed"; callers holding stamps
/// across ticks pull them back with [`rewind_if_ahead`] first.
pub(crate) fn elapsed_at_least(since: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    match (now - since).to_std() {
        Ok(elapsed) => elapsed >= window,
        Err(_) => false,
    }
}

/// Moves `stamp` back to `now` when the wall clock was stepped backwards past it.
///
/// Without this a stamp left in the future would hold every window shut until
/// real time caught up with it.
pub(crate) fn rewind_if_ahead(stamp: &mut Option<DateTime<Utc>>, now: DateTime<Utc>) {
    if stamp.is_some_and(|at| at > now) {
        *stamp = Some(now);
    }
}
