//! # LogSink: events as tracing records
//!
//! Maps each [`Event`] onto a `tracing` record at the event's level, with the
//! kind label, worker name and failure count as structured fields.
//!
//! ## Example output (default formatter)
//! ```text
//! ERROR brokervisor: connection attempt 1/10 failed, retrying in 1s: connection refused kind="connect_failed" worker="svc-x1:edge" attempt=1
//!  INFO brokervisor: connection restored after 2 failed attempt(s) kind="worker_recovered" worker="svc-x1:edge" attempt=2
//!  WARN brokervisor: memory usage approaching threshold: current=85.00MB peak=85.00MB threshold=100MB kind="memory_high"
//! ```

use tracing::{error, info, warn};

use crate::events::{Event, Level};
use crate::output::OutputSink;

/// Tracing-backed sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl LogSink {
    /// Construct a new [`LogSink`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl OutputSink for LogSink {
    fn emit(&self, e: &Event) {
        let kind = e.kind.as_label();
        let worker = e.worker.as_deref().unwrap_or("-");
        let attempt = e.attempt.unwrap_or(0);
        let message = e.message();

        match e.level() {
            Level::Info => info!(kind, worker, attempt, "{message}"),
            Level::Warning => warn!(kind, worker, attempt, "{message}"),
            Level::Error => error!(kind, worker, attempt, "{message}"),
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
