//! # Fan-out of events to multiple sinks.
//!
//! Provides [`SinkSet`], which hands every event to each member sink in order.
//!
//! ## Rules
//! - **Per-sink ordering**: each sink sees events in emission order
//! - **Isolation**: a panicking sink is skipped for that event; the others still receive it
//! - **Synchronous**: `emit()` returns after every sink has been called
//!
//! ## Panic handling
//! Each call is wrapped in `catch_unwind`. The panic is logged through `tracing`
//! with the sink's [`name`](crate::OutputSink::name).
//!
//! **Warning**: `AssertUnwindSafe` is used, which can leave shared state inconsistent
//! if a sink uses `Mutex<T>` and panics while holding the lock.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::error::panic_message;
use crate::events::Event;
use crate::output::OutputSink;

/// Fan-out over several sinks.
#[derive(Default)]
pub struct SinkSet {
    sinks: Vec<Arc<dyn OutputSink>>,
}

impl SinkSet {
    /// Creates a set over `sinks`.
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn OutputSink>>) -> Self {
        Self { sinks }
    }

    /// Adds a sink.
    pub fn push(&mut self, sink: Arc<dyn OutputSink>) {
        self.sinks.push(sink);
    }

    /// Number of member sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether the set has no members.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl OutputSink for SinkSet {
    fn emit(&self, event: &Event) {
        for sink in &self.sinks {
            if let Err(panic_err) = catch_unwind(AssertUnwindSafe(|| sink.emit(event))) {
                tracing::error!(
                    sink = sink.name(),
                    info = %panic_message(panic_err.as_ref()),
                    "output sink panicked"
                );
            }
        }
    }

    fn name(&self) -> &'static str {
        "set"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::output::RecordingSink;

    struct Exploding;

    impl OutputSink for Exploding {
        fn emit(&self, _event: &Event) {
            panic!("sink exploded");
        }
    }

    #[test]
    fn test_panicking_sink_does_not_starve_others() {
        let recorder = Arc::new(RecordingSink::default());
        let set = SinkSet::new(vec![Arc::new(Exploding), recorder.clone()]);

        set.emit(&Event::new(EventKind::WorkerPaused));
        set.emit(&Event::new(EventKind::WorkerResumed));

        assert_eq!(
            recorder.kinds(),
            vec![EventKind::WorkerPaused, EventKind::WorkerResumed]
        );
        assert_eq!(set.len(), 2);
    }
}
