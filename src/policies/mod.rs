//! Reconnect policies.
//!
//! This module groups the knobs that control **when** a worker gives up and
//! **how long** it waits between reconnect attempts.
//!
//! ## Contents
//! - [`RetryPolicy`] retry budget, circuit breaker window, exhaustion behavior
//! - [`ExhaustionPolicy`] terminate or cool down once the retry budget is spent
//! - [`BackoffPolicy`] how delays evolve (first / factor / max)
//!
//! ## Quick wiring
//! ```text
//! WorkerConfig { retry: RetryPolicy, .. }
//!      └─► core::worker::Worker uses:
//!           - retry.backoff().delay_after(retry_count) after each failure
//!           - retry.max_failure_duration() for the circuit breaker
//!           - retry.on_exhausted once retry_count reaches max_retries
//! ```

mod backoff;
mod retry;

pub use backoff::BackoffPolicy;
pub use retry::{ExhaustionPolicy, RetryPolicy};
