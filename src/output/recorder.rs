//! # RecordingSink: keeps events in memory
//!
//! Useful for tests and for dashboards that show the most recent diagnostics.
//! Holds at most `capacity` events; the oldest are dropped first.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::events::{Event, EventKind, Level};
use crate::output::OutputSink;

/// In-memory ring of recent events.
pub struct RecordingSink {
    events: Mutex<VecDeque<Event>>,
    capacity: usize,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl RecordingSink {
    /// Creates a recorder keeping up to `capacity` events (min 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of the recorded events, oldest first.
    pub fn events(&self) -> Vec<Event> {
        self.lock().iter().cloned().collect()
    }

    /// Recorded kinds, oldest first.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.lock().iter().map(|e| e.kind).collect()
    }

    /// Number of recorded events of `kind`.
    pub fn count(&self, kind: EventKind) -> usize {
        self.lock().iter().filter(|e| e.kind == kind).count()
    }

    /// Events at `level` or above.
    pub fn at_least(&self, level: Level) -> Vec<Event> {
        self.lock()
            .iter()
            .filter(|e| e.level() >= level)
            .cloned()
            .collect()
    }

    /// Drops every recorded event.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl OutputSink for RecordingSink {
    fn emit(&self, event: &Event) {
        let mut events = self.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_drops_oldest() {
        let sink = RecordingSink::new(2);
        sink.emit(&Event::new(EventKind::WorkerPaused));
        sink.emit(&Event::new(EventKind::WorkerResumed));
        sink.emit(&Event::new(EventKind::ConnectFailed));

        assert_eq!(
            sink.kinds(),
            vec![EventKind::WorkerResumed, EventKind::ConnectFailed]
        );
        assert_eq!(sink.at_least(Level::Error).len(), 1);
        assert_eq!(sink.count(EventKind::WorkerPaused), 0);
    }
}
