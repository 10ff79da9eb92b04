//! # Memory monitor.
//!
//! [`MemoryMonitor::tick`] is called once per coordinator tick. Every
//! `gc_interval_ticks` calls it runs a collection pass (the probe's reclaim hook),
//! samples usage and checks it against the ceiling:
//!
//! ```text
//!   usage / threshold
//!   ─────────────────────────────────────────────────────────────
//!   < 80%        nothing (or MemoryRecovered when leaving "exceeded")
//!   80% .. 100%  MemoryHigh                         (every check)
//!   >= 100%      MemoryExceeded + RestartScheduled   (first entry only)
//!                RestartRequested → Restart verdict  (once, after the grace period)
//! ```
//!
//! The monitor never calls back into the coordinator. A sustained excess is
//! reported as [`MemoryVerdict::Restart`] and the coordinator acts on it.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::{ClockRef, SystemClock, elapsed_at_least, rewind_if_ahead};
use crate::config::MemoryConfig;
use crate::events::{Event, EventKind, MemoryReading};
use crate::monitor::MemoryProbe;
use crate::output::{NullSink, SinkRef};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Fraction of the ceiling at which warnings start.
const WARNING_RATIO: f64 = 0.8;

/// Current and peak usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub current_bytes: u64,
    pub peak_bytes: u64,
}

impl MemoryStats {
    /// Current usage in megabytes.
    pub fn current_mb(&self) -> f64 {
        self.current_bytes as f64 / BYTES_PER_MB
    }

    /// Peak usage in megabytes.
    pub fn peak_mb(&self) -> f64 {
        self.peak_bytes as f64 / BYTES_PER_MB
    }
}

/// Outcome of a monitor tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryVerdict {
    /// Keep processing normally.
    Continue,
    /// Memory stayed above the ceiling for the grace period; restart the process.
    Restart,
}

/// Periodic memory collection and ceiling enforcement.
pub struct MemoryMonitor {
    cfg: MemoryConfig,
    probe: Arc<dyn MemoryProbe>,
    clock: ClockRef,
    sink: SinkRef,
    source: Option<Arc<str>>,

    ticks: u64,
    stats: MemoryStats,
    exceeded_since: Option<DateTime<Utc>>,
    restart_requested: bool,
}

impl MemoryMonitor {
    /// Creates a monitor reading from `probe`, reporting nowhere, on the system clock.
    pub fn new(cfg: MemoryConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            cfg,
            probe,
            clock: Arc::new(SystemClock),
            sink: Arc::new(NullSink),
            source: None,
            ticks: 0,
            stats: MemoryStats::default(),
            exceeded_since: None,
            restart_requested: false,
        }
    }

    /// Reports through `sink`.
    pub fn with_sink(mut self, sink: SinkRef) -> Self {
        self.sink = sink;
        self
    }

    /// Measures the grace period on `clock`.
    pub fn with_clock(mut self, clock: ClockRef) -> Self {
        self.clock = clock;
        self
    }

    /// Tags events with `name` (usually the coordinator's process name).
    pub fn with_source(mut self, name: impl Into<Arc<str>>) -> Self {
        self.source = Some(name.into());
        self
    }

    pub(crate) fn attach(&mut self, sink: SinkRef, clock: ClockRef, source: Arc<str>) {
        self.sink = sink;
        self.clock = clock;
        self.source = Some(source);
    }

    /// Settings in effect.
    pub fn config(&self) -> &MemoryConfig {
        &self.cfg
    }

    /// One coordinator tick.
    pub fn tick(&mut self) -> MemoryVerdict {
        self.ticks += 1;
        if self.ticks % u64::from(self.cfg.gc_interval_clamped()) != 0 {
            return MemoryVerdict::Continue;
        }

        self.probe.reclaim();
        self.sample();
        self.check_threshold()
    }

    /// Samples usage and returns current and peak figures.
    pub fn memory_stats(&mut self) -> MemoryStats {
        self.sample();
        self.stats
    }

    /// Figures from the last sample, without sampling.
    pub fn last_stats(&self) -> MemoryStats {
        self.stats
    }

    /// Clears the tick counter, the exceeded state and the peak.
    pub fn reset(&mut self) {
        let current = self.probe.current_bytes();
        self.ticks = 0;
        self.stats = MemoryStats {
            current_bytes: current,
            peak_bytes: current,
        };
        self.exceeded_since = None;
        self.restart_requested = false;
    }

    /// Whether usage is currently at or above the ceiling.
    pub fn is_exceeded(&self) -> bool {
        self.exceeded_since.is_some()
    }

    fn sample(&mut self) {
        let current = self.probe.current_bytes();
        self.stats.current_bytes = current;
        self.stats.peak_bytes = self.stats.peak_bytes.max(current);
    }

    fn check_threshold(&mut self) -> MemoryVerdict {
        let Some(threshold_mb) = self.cfg.threshold_mb else {
            return MemoryVerdict::Continue;
        };
        let now = self.clock.now();
        let reading = MemoryReading {
            current_mb: self.stats.current_mb(),
            peak_mb: self.stats.peak_mb(),
            threshold_mb,
        };
        let threshold = threshold_mb as f64;

        if reading.current_mb >= threshold {
            rewind_if_ahead(&mut self.exceeded_since, now);
            let since = match self.exceeded_since {
                Some(since) => since,
                None => {
                    self.exceeded_since = Some(now);
                    self.emit(EventKind::MemoryExceeded, now, |ev| ev.with_memory(reading));
                    if self.cfg.auto_restart {
                        let delay = self.cfg.restart_delay();
                        self.emit(EventKind::RestartScheduled, now, |ev| ev.with_delay(delay));
                    }
                    now
                }
            };

            if self.cfg.auto_restart
                && !self.restart_requested
                && elapsed_at_least(since, now, self.cfg.restart_delay())
            {
                self.restart_requested = true;
                self.emit(EventKind::RestartRequested, now, |ev| ev.with_memory(reading));
                return MemoryVerdict::Restart;
            }
            return MemoryVerdict::Continue;
        }

        if self.exceeded_since.take().is_some() {
            self.emit(EventKind::MemoryRecovered, now, |ev| ev.with_memory(reading));
        }
        if reading.current_mb >= threshold * WARNING_RATIO {
            self.emit(EventKind::MemoryHigh, now, |ev| ev.with_memory(reading));
        }
        MemoryVerdict::Continue
    }

    fn emit(&self, kind: EventKind, at: DateTime<Utc>, f: impl FnOnce(Event) -> Event) {
        let mut ev = Event::new(kind).at(at);
        if let Some(source) = &self.source {
            ev = ev.with_worker(source.clone());
        }
        self.sink.emit(&f(ev));
    }
}
