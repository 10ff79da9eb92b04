//! # Diagnostics emitted by workers, the coordinator and the memory monitor.
//!
//! The [`EventKind`] enum classifies events across three groups:
//! - **Worker events**: connection lifecycle, retries, circuit breaking, operational errors
//! - **Coordinator events**: pool changes, pause/resume, intents, failed ticks
//! - **Memory events**: threshold tiers and restart requests
//!
//! Each kind maps to a fixed [`Level`]; [`Event::message`] renders a one-line
//! human-readable description from the structured fields.
//!
//! ## Ordering guarantees
//! Each event has a process-wide sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use brokervisor::{Event, EventKind, Level};
//!
//! let ev = Event::new(EventKind::ConnectFailed)
//!     .with_worker("svc-abc:edge")
//!     .with_attempt(3, 10)
//!     .with_delay(Duration::from_secs(4))
//!     .with_reason("connection refused");
//!
//! assert_eq!(ev.level(), Level::Error);
//! assert_eq!(
//!     ev.message(),
//!     "connection attempt 3/10 failed, retrying in 4s: connection refused"
//! );
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Info => write!(f, "info"),
            Level::Warning => write!(f, "warning"),
            Level::Error => write!(f, "error"),
        }
    }
}

/// Classification of supervisor events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Worker events ===
    /// Worker connected and subscribed on its first try.
    ///
    /// Sets:
    /// - `worker`: worker name
    /// - `reason`: subscription filter
    WorkerConnected,

    /// Worker connected and subscribed after one or more failures.
    ///
    /// Sets:
    /// - `worker`: worker name
    /// - `attempt`: failures since the last successful connect
    WorkerRecovered,

    /// Connect or subscribe failed; the backoff clock advanced.
    ///
    /// Sets:
    /// - `worker`: worker name
    /// - `attempt` / `max_attempts`: failure count and retry budget
    /// - `delay`: wait before the next attempt
    /// - `reason`: failure message
    ConnectFailed,

    /// Failures have lasted longer than the circuit breaker window.
    ///
    /// Sets:
    /// - `worker`: worker name
    /// - `delay`: configured window
    CircuitOpened,

    /// Retry budget spent with the terminate policy.
    ///
    /// Sets:
    /// - `worker`: worker name
    /// - `attempt`: failure count
    RetriesExhausted,

    /// Retry budget spent with the cooldown policy; count reset.
    ///
    /// Sets:
    /// - `worker`: worker name
    /// - `delay`: cooldown delay (the backoff cap)
    RetryCooldown,

    /// Pump or liveness refresh failed while connected.
    ///
    /// Sets:
    /// - `worker`: worker name
    /// - `reason`: failure message
    OperationalError,

    /// The notification sink failed or panicked for a message.
    ///
    /// Sets:
    /// - `worker`: worker name
    /// - `reason`: topic and failure message
    NotifyFailed,

    /// Worker paused.
    WorkerPaused,

    /// Worker resumed.
    WorkerResumed,

    /// Worker terminated; its registration was removed.
    WorkerTerminated,

    /// A teardown step failed (logged, teardown continued).
    ///
    /// Sets:
    /// - `worker`: worker name (or coordinator name)
    /// - `reason`: failure message
    CleanupFailed,

    // === Coordinator events ===
    /// Coordinator loop started.
    ///
    /// Sets:
    /// - `worker`: coordinator name
    CoordinatorStarted,

    /// Worker appended to the pool.
    WorkerAdded,

    /// Terminated worker removed from the pool.
    WorkerReaped,

    /// Coordinator and every pooled worker paused.
    CoordinatorPaused,

    /// Coordinator and every pooled worker resumed.
    CoordinatorResumed,

    /// Intent (signal or control request) applied at a tick boundary.
    ///
    /// Sets:
    /// - `reason`: intent label
    IntentReceived,

    /// A tick failed or panicked; the loop continues.
    ///
    /// Sets:
    /// - `reason`: failure message
    TickFailed,

    /// Coordinator torn down.
    ///
    /// Sets:
    /// - `code`: exit status
    CoordinatorStopped,

    // === Memory events ===
    /// Usage between 80% and 100% of the ceiling.
    ///
    /// Sets:
    /// - `memory`: current / peak / threshold
    MemoryHigh,

    /// Usage reached the ceiling.
    MemoryExceeded,

    /// Auto-restart will fire if usage stays above the ceiling.
    ///
    /// Sets:
    /// - `delay`: grace period
    RestartScheduled,

    /// Usage stayed above the ceiling for the grace period; restart requested.
    RestartRequested,

    /// Usage dropped back below the ceiling.
    MemoryRecovered,
}

impl EventKind {
    /// Severity of this kind.
    pub fn level(self) -> Level {
        match self {
            EventKind::ConnectFailed
            | EventKind::CircuitOpened
            | EventKind::RetriesExhausted
            | EventKind::OperationalError
            | EventKind::NotifyFailed
            | EventKind::TickFailed
            | EventKind::MemoryExceeded
            | EventKind::RestartRequested => Level::Error,

            EventKind::RetryCooldown
            | EventKind::CleanupFailed
            | EventKind::MemoryHigh
            | EventKind::RestartScheduled => Level::Warning,

            EventKind::WorkerConnected
            | EventKind::WorkerRecovered
            | EventKind::WorkerPaused
            | EventKind::WorkerResumed
            | EventKind::WorkerTerminated
            | EventKind::CoordinatorStarted
            | EventKind::WorkerAdded
            | EventKind::WorkerReaped
            | EventKind::CoordinatorPaused
            | EventKind::CoordinatorResumed
            | EventKind::IntentReceived
            | EventKind::CoordinatorStopped
            | EventKind::MemoryRecovered => Level::Info,
        }
    }

    /// Short stable label (snake_case) for logs.
    pub fn as_label(self) -> &'static str {
        match self {
            EventKind::WorkerConnected => "worker_connected",
            EventKind::WorkerRecovered => "worker_recovered",
            EventKind::ConnectFailed => "connect_failed",
            EventKind::CircuitOpened => "circuit_opened",
            EventKind::RetriesExhausted => "retries_exhausted",
            EventKind::RetryCooldown => "retry_cooldown",
            EventKind::OperationalError => "operational_error",
            EventKind::NotifyFailed => "notify_failed",
            EventKind::WorkerPaused => "worker_paused",
            EventKind::WorkerResumed => "worker_resumed",
            EventKind::WorkerTerminated => "worker_terminated",
            EventKind::CleanupFailed => "cleanup_failed",
            EventKind::CoordinatorStarted => "coordinator_started",
            EventKind::WorkerAdded => "worker_added",
            EventKind::WorkerReaped => "worker_reaped",
            EventKind::CoordinatorPaused => "coordinator_paused",
            EventKind::CoordinatorResumed => "coordinator_resumed",
            EventKind::IntentReceived => "intent_received",
            EventKind::TickFailed => "tick_failed",
            EventKind::CoordinatorStopped => "coordinator_stopped",
            EventKind::MemoryHigh => "memory_high",
            EventKind::MemoryExceeded => "memory_exceeded",
            EventKind::RestartScheduled => "restart_scheduled",
            EventKind::RestartRequested => "restart_requested",
            EventKind::MemoryRecovered => "memory_recovered",
        }
    }
}

/// Memory figures attached to memory events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryReading {
    pub current_mb: f64,
    pub peak_mb: f64,
    pub threshold_mb: u64,
}

/// Supervisor event with optional metadata.
///
/// - `seq`: monotonic sequence for ordering
/// - `at`: wall-clock timestamp
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Debug, Clone)]
pub struct Event {
    /// Monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: DateTime<Utc>,
    /// Event classification.
    pub kind: EventKind,

    /// Worker (or coordinator) name, if applicable.
    pub worker: Option<Arc<str>>,
    /// Human-readable cause.
    pub reason: Option<Arc<str>>,
    /// Failure count.
    pub attempt: Option<u32>,
    /// Retry budget.
    pub max_attempts: Option<u32>,
    /// Delay or window, in whole seconds.
    pub delay_secs: Option<u64>,
    /// Memory figures.
    pub memory: Option<MemoryReading>,
    /// Exit status.
    pub code: Option<i32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: Utc::now(),
            kind,
            worker: None,
            reason: None,
            attempt: None,
            max_attempts: None,
            delay_secs: None,
            memory: None,
            code: None,
        }
    }

    /// Overrides the timestamp (events built against an injected clock).
    #[inline]
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }

    /// Attaches a worker name.
    #[inline]
    pub fn with_worker(mut self, worker: impl Into<Arc<str>>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a failure count and the retry budget.
    #[inline]
    pub fn with_attempt(mut self, attempt: u32, max_attempts: u32) -> Self {
        self.attempt = Some(attempt);
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Attaches a failure count without a budget.
    #[inline]
    pub fn with_failures(mut self, failures: u32) -> Self {
        self.attempt = Some(failures);
        self
    }

    /// Attaches a delay (stored as whole seconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_secs = Some(d.as_secs());
        self
    }

    /// Attaches memory figures.
    #[inline]
    pub fn with_memory(mut self, reading: MemoryReading) -> Self {
        self.memory = Some(reading);
        self
    }

    /// Attaches an exit status.
    #[inline]
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    /// Severity of this event.
    #[inline]
    pub fn level(&self) -> Level {
        self.kind.level()
    }

    /// Renders a one-line description.
    pub fn message(&self) -> String {
        let reason = self.reason.as_deref().unwrap_or("unknown");
        let delay = self.delay_secs.unwrap_or(0);
        let attempt = self.attempt.unwrap_or(0);
        let memory = self
            .memory
            .map(|m| {
                format!(
                    "current={:.2}MB peak={:.2}MB threshold={}MB",
                    m.current_mb, m.peak_mb, m.threshold_mb
                )
            })
            .unwrap_or_default();

        match self.kind {
            EventKind::WorkerConnected => format!("connected, subscribed to {reason}"),
            EventKind::WorkerRecovered => {
                format!("connection restored after {attempt} failed attempt(s)")
            }
            EventKind::ConnectFailed => format!(
                "connection attempt {}/{} failed, retrying in {}s: {}",
                attempt,
                self.max_attempts.unwrap_or(0),
                delay,
                reason
            ),
            EventKind::CircuitOpened => {
                format!("connection failing for at least {delay}s, giving up")
            }
            EventKind::RetriesExhausted => {
                format!("retry budget exhausted after {attempt} attempt(s), terminating")
            }
            EventKind::RetryCooldown => {
                format!("retry budget exhausted, cooling down: next attempt in {delay}s")
            }
            EventKind::OperationalError => format!("operational error: {reason}"),
            EventKind::NotifyFailed => format!("message notification failed: {reason}"),
            EventKind::WorkerPaused => "paused".to_string(),
            EventKind::WorkerResumed => "resumed".to_string(),
            EventKind::WorkerTerminated => "terminated".to_string(),
            EventKind::CleanupFailed => format!("cleanup step failed: {reason}"),
            EventKind::CoordinatorStarted => "coordinator started".to_string(),
            EventKind::WorkerAdded => "worker added to pool".to_string(),
            EventKind::WorkerReaped => "worker removed from pool".to_string(),
            EventKind::CoordinatorPaused => "coordinator paused".to_string(),
            EventKind::CoordinatorResumed => "coordinator resumed".to_string(),
            EventKind::IntentReceived => format!("{reason} requested"),
            EventKind::TickFailed => format!("tick failed: {reason}"),
            EventKind::CoordinatorStopped => {
                format!("coordinator stopped with status {}", self.code.unwrap_or(0))
            }
            EventKind::MemoryHigh => format!("memory usage approaching threshold: {memory}"),
            EventKind::MemoryExceeded => format!("memory threshold exceeded: {memory}"),
            EventKind::RestartScheduled => {
                format!("restart in {delay}s unless memory usage drops")
            }
            EventKind::RestartRequested => format!("restarting due to memory usage: {memory}"),
            EventKind::MemoryRecovered => format!("memory usage back under threshold: {memory}"),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.worker.as_deref() {
            Some(worker) => write!(f, "[{}] {}: {}", self.level(), worker, self.message()),
            None => write!(f, "[{}] {}", self.level(), self.message()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let a = Event::new(EventKind::WorkerPaused);
        let b = Event::new(EventKind::WorkerResumed);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_levels_by_kind() {
        assert_eq!(EventKind::ConnectFailed.level(), Level::Error);
        assert_eq!(EventKind::MemoryHigh.level(), Level::Warning);
        assert_eq!(EventKind::WorkerRecovered.level(), Level::Info);
        assert!(Level::Error > Level::Warning && Level::Warning > Level::Info);
    }

    #[test]
    fn test_memory_message_and_display() {
        let ev = Event::new(EventKind::MemoryHigh)
            .with_worker("svc-abc")
            .with_memory(MemoryReading {
                current_mb: 85.0,
                peak_mb: 90.5,
                threshold_mb: 100,
            });
        assert_eq!(
            ev.to_string(),
            "[warning] svc-abc: memory usage approaching threshold: current=85.00MB peak=90.50MB threshold=100MB"
        );
    }
}
