//! # Output sinks for supervisor diagnostics.
//!
//! This module provides the [`OutputSink`] trait and built-in implementations for
//! handling [`Event`]s emitted by workers, the coordinator and the memory monitor.
//!
//! ## Architecture
//! ```text
//! Worker / Coordinator / MemoryMonitor
//!        │ emit(&Event)
//!        ▼
//!   Arc<dyn OutputSink>
//!        ├──► LogSink        (tracing)
//!        ├──► RecordingSink  (in-memory, tests/dashboards)
//!        ├──► NullSink       (diagnostics disabled)
//!        └──► SinkSet        (fan-out to several sinks, panic isolation)
//! ```
//!
//! ## Implementing a custom sink
//! ```no_run
//! use brokervisor::{Event, Level, OutputSink};
//!
//! struct Alerts;
//!
//! impl OutputSink for Alerts {
//!     fn emit(&self, event: &Event) {
//!         if event.level() == Level::Error {
//!             // page someone
//!         }
//!     }
//!     fn name(&self) -> &'static str { "alerts" }
//! }
//! ```

mod log;
mod recorder;
mod set;

use std::sync::Arc;

use crate::events::Event;

pub use log::LogSink;
pub use recorder::RecordingSink;
pub use set::SinkSet;

/// Contract for diagnostic sinks.
///
/// Called synchronously from inside a tick: implementations must return quickly
/// and must not block on I/O.
pub trait OutputSink: Send + Sync + 'static {
    /// Handles a single event.
    fn emit(&self, event: &Event);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Shared sink handle.
pub type SinkRef = Arc<dyn OutputSink>;

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn emit(&self, _event: &Event) {}

    fn name(&self) -> &'static str {
        "null"
    }
}
