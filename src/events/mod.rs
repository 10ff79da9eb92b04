//! Supervisor diagnostics.
//!
//! This module holds the event **data model** every component reports through.
//! Events are handed synchronously to an [`OutputSink`](crate::output::OutputSink);
//! there is no bus, because every producer runs inside the coordinator's tick.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] classification and payload metadata
//! - [`Level`] severity (`info`, `warning`, `error`)
//! - [`MemoryReading`] figures attached to memory events
//!
//! ## Quick reference
//! - **Producers**: `Worker`, `Coordinator`, `MemoryMonitor`.
//! - **Consumers**: any [`OutputSink`](crate::output::OutputSink) (`LogSink`, `RecordingSink`, `SinkSet`).

mod event;

pub use event::{Event, EventKind, Level, MemoryReading};
