use std::sync::Arc;

use crate::{
    clock::{ClockRef, SystemClock},
    config::{CoordinatorConfig, MemoryConfig},
    error::ConfigError,
    identity::ProcessIdentity,
    monitor::{MemoryMonitor, MemoryProbe, ProcessMemory},
    output::{NullSink, SinkRef},
    store::{HealthStore, memory::MemoryHealthStore},
};

use super::{coordinator::Coordinator, worker::Worker};

/// Builder for constructing a [`Coordinator`] with optional collaborators.
///
/// Defaults:
/// - health store: [`MemoryHealthStore`] with `cfg.health_ttl()`
/// - diagnostics: [`NullSink`]
/// - clock: [`SystemClock`]
/// - memory: [`MemoryConfig::default`] (threshold disabled) over [`ProcessMemory`]
pub struct CoordinatorBuilder {
    identity: ProcessIdentity,
    cfg: CoordinatorConfig,
    health: Option<Arc<dyn HealthStore>>,
    sink: SinkRef,
    clock: ClockRef,
    monitor: Option<MemoryMonitor>,
    workers: Vec<Worker>,
}

impl CoordinatorBuilder {
    /// Creates a new builder with the given identity and configuration.
    pub fn new(identity: ProcessIdentity, cfg: CoordinatorConfig) -> Self {
        Self {
            identity,
            cfg,
            health: None,
            sink: Arc::new(NullSink),
            clock: Arc::new(SystemClock),
            monitor: None,
            workers: Vec::new(),
        }
    }

    /// Sets the store receiving the health record.
    pub fn with_health_store(mut self, health: Arc<dyn HealthStore>) -> Self {
        self.health = Some(health);
        self
    }

    /// Sets the diagnostics sink (shared with the memory monitor).
    pub fn with_sink(mut self, sink: SinkRef) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the clock (shared with the memory monitor and the default health store).
    pub fn with_clock(mut self, clock: ClockRef) -> Self {
        self.clock = clock;
        self
    }

    /// Monitors memory with `cfg`, reading from `probe`.
    pub fn with_memory(mut self, cfg: MemoryConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        self.monitor = Some(MemoryMonitor::new(cfg, probe));
        self
    }

    /// Uses a preconfigured monitor. Its sink and clock are replaced by the builder's.
    pub fn with_memory_monitor(mut self, monitor: MemoryMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Adds workers to the initial pool, in order.
    pub fn with_workers(mut self, workers: impl IntoIterator<Item = Worker>) -> Self {
        self.workers.extend(workers);
        self
    }

    /// Validates settings and builds the coordinator.
    pub fn build(self) -> Result<Coordinator, ConfigError> {
        self.cfg.validate()?;

        let mut monitor = self.monitor.unwrap_or_else(|| {
            MemoryMonitor::new(MemoryConfig::default(), Arc::new(ProcessMemory))
        });
        monitor.config().validate()?;
        monitor.attach(
            self.sink.clone(),
            self.clock.clone(),
            Arc::from(self.identity.process_name()),
        );

        let health = match self.health {
            Some(health) => health,
            None => Arc::new(MemoryHealthStore::with_clock(
                self.cfg.health_ttl(),
                self.clock.clone(),
            )),
        };

        let mut coordinator = Coordinator::from_parts(
            self.identity,
            self.cfg,
            monitor,
            health,
            self.sink,
            self.clock,
        );
        for worker in self.workers {
            coordinator.add_worker(worker);
        }
        Ok(coordinator)
    }
}
