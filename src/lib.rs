//! # brokervisor
//!
//! **Brokervisor** is a supervisor tree for long-lived broker connections.
//!
//! It keeps one connection per configured broker alive across transient
//! failures, circuit-breaks connections that keep failing, bounds the memory of a
//! process that runs for days, and publishes a TTL-bounded health record that
//! external health checks read.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   OS signals ──┐        Controls ──┐
//!                ▼                   ▼
//!          ┌──────────────────────────────┐
//!          │  intent queue (deferred)     │
//!          └──────────────┬───────────────┘
//!                         ▼ drained at the top of every tick
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Coordinator (control loop, one tick per interval)                │
//! │  - pool of Workers (insertion order)                              │
//! │  - MemoryMonitor (collection pass, thresholds, restart verdict)   │
//! │  - HealthStore (HealthRecord, rewritten every tick)               │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │   Worker     │   │   Worker     │   │   Worker     │
//!     │ (backoff +   │   │ (backoff +   │   │ (backoff +   │
//!     │  breaker)    │   │  breaker)    │   │  breaker)    │
//!     └┬─────────────┘   └┬─────────────┘   └┬─────────────┘
//!      │ Connection        │ Connection        │ Connection
//!      │ WorkerRepository  │ NotificationSink  │ ...
//!      ▼                   ▼                   ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  OutputSink (LogSink, RecordingSink, SinkSet, NullSink)           │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Lifecycle
//! ```text
//! Coordinator::run()
//!   ├─► install signal listener, persist initial HealthRecord
//!   └─► loop {
//!         sleep(tick_interval)
//!         tick():
//!           ├─► apply intents: pause / resume / restart / terminate
//!           ├─► if working: every Worker ticks, terminated Workers are reaped
//!           ├─► MemoryMonitor::tick() ─► Restart ─► terminate(0)
//!           └─► persist HealthRecord
//!       }
//!
//! Worker::tick()
//!   ├─► paused or terminated ─► nothing
//!   ├─► connected ─► pump once, deliver messages, touch liveness row
//!   └─► disconnected and backoff allows ─► connect + subscribe
//!         ├─ Ok  ─► reset backoff clock
//!         └─ Err ─► delay = min(2^(n-1), cap)
//!                   ├─ failing longer than max_failure_duration ─► terminate
//!                   └─ n reached max_retries ─► terminate, or cool down at the cap
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                          |
//! |-------------------|--------------------------------------------------------------|---------------------------------------------|
//! | **Supervision**   | Control loop, worker pool, deferred lifecycle requests.      | [`Coordinator`], [`Worker`], [`Controls`]   |
//! | **Policies**      | Reconnect backoff, retry budget, circuit breaker window.     | [`RetryPolicy`], [`BackoffPolicy`]          |
//! | **Connections**   | Opaque broker connection and factory, simulated broker.      | [`Connection`], [`ConnectionFactory`]       |
//! | **Persistence**   | Liveness rows and TTL-bounded health records.                | [`WorkerRepository`], [`HealthStore`]       |
//! | **Memory**        | Periodic collection pass, threshold tiers, auto-restart.     | [`MemoryMonitor`], [`MemoryProbe`]          |
//! | **Diagnostics**   | Structured events delivered to pluggable sinks.              | [`Event`], [`OutputSink`]                   |
//! | **Configuration** | Layered settings from TOML files and the environment.        | [`Settings`]                                |
//! | **Errors**        | Typed errors grouped by how they are handled.                | [`ConfigError`], [`LinkError`], [`RuntimeError`] |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use brokervisor::{
//!     Coordinator, CoordinatorConfig, Flow, LogSink, ProcessIdentity, Worker, WorkerConfig,
//!     WorkerContext, link::sim::SimFactory, store::memory::MemoryWorkerRepository,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let identity = ProcessIdentity::generate("ingest");
//!
//!     let factory = Arc::new(SimFactory::new());
//!     let broker = factory.add("edge");
//!     let ctx = WorkerContext::new(factory, Arc::new(MemoryWorkerRepository::new()))
//!         .with_sink(Arc::new(LogSink));
//!
//!     let worker = Worker::new(
//!         &identity,
//!         WorkerConfig::new("edge").with_topic_prefix("sensors"),
//!         ctx,
//!     )?;
//!
//!     let mut coordinator = Coordinator::builder(identity, CoordinatorConfig::default())
//!         .with_sink(Arc::new(LogSink))
//!         .with_workers([worker])
//!         .build()?;
//!
//!     // The run loop sleeps between ticks; tests and embedders can drive ticks directly.
//!     assert_eq!(coordinator.tick().await, Flow::Continue);
//!     assert_eq!(broker.connect_calls(), 1);
//!
//!     coordinator.controls().terminate(0);
//!     assert_eq!(coordinator.tick().await, Flow::Exit(0));
//!     Ok(())
//! }
//! ```
mod clock;
mod config;
mod core;
mod error;
mod events;
mod identity;
mod policies;

pub mod link;
pub mod monitor;
pub mod notify;
pub mod output;
pub mod store;
pub mod telemetry;

// ---- Public re-exports ----

pub use crate::clock::{Clock, ClockRef, ManualClock, SystemClock};
pub use crate::config::{CoordinatorConfig, LoggingConfig, MemoryConfig, Settings, WorkerConfig};
pub use crate::core::{
    Controls, Coordinator, CoordinatorBuilder, CoordinatorSnapshot, Flow, Intent, Worker,
    WorkerContext, WorkerSnapshot, WorkerStatus,
};
pub use crate::error::{ConfigError, LinkError, NotifyError, RuntimeError, StoreError};
pub use crate::events::{Event, EventKind, Level, MemoryReading};
pub use crate::identity::ProcessIdentity;
pub use crate::link::{
    AuthSettings, ConnectSettings, Connection, ConnectionFactory, Message, OnMessage, QoS,
};
pub use crate::monitor::{MemoryMonitor, MemoryProbe, MemoryStats, MemoryVerdict, ProcessMemory};
pub use crate::notify::{InboundMessage, NotificationSink};
pub use crate::output::{LogSink, NullSink, OutputSink, RecordingSink, SinkRef, SinkSet};
pub use crate::policies::{BackoffPolicy, ExhaustionPolicy, RetryPolicy};
pub use crate::store::{CoordinatorStatus, Fields, HealthRecord, HealthStore, WorkerRepository};
pub use crate::telemetry::init_tracing;
