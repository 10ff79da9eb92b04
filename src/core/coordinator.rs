//! # Coordinator: master supervisor.
//!
//! The [`Coordinator`] owns a pool of [`Worker`]s, the [`MemoryMonitor`] and the
//! process health record. It runs a fixed-period control loop; every step is one
//! [`tick`](Coordinator::tick).
//!
//! ## Tick
//! ```text
//! tick()
//!   ├─► drain intents (signals, Controls)  ──► pause / resume / restart / terminate
//!   ├─► if working:
//!   │     ├─► join_all(worker.tick())      each worker borrowed by exactly one future
//!   │     └─► reap terminated workers      after every worker tick completed
//!   ├─► monitor.tick()
//!   │     └─► Restart ──► restart() ──► Flow::Exit(0)   (health record not rewritten)
//!   └─► persist HealthRecord
//!
//! errors and panics anywhere above ──► TickFailed event, Flow::Continue
//! ```
//!
//! ## Run loop
//! ```text
//! run()
//!   ├─► install signal listener  (signals → intent queue)
//!   ├─► CoordinatorStarted, persist initial state
//!   └─► loop { sleep(tick_interval); tick() } until Flow::Exit(status)
//! ```
//!
//! ## Rules
//! - Signals and [`Controls`] requests take effect at the next tick boundary, never mid-tick.
//! - A failing or panicking tick is reported and the loop continues.
//! - [`terminate`](Coordinator::terminate) never exits the process; the status is returned
//!   from [`run`](Coordinator::run) for the entry point to exit with.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::clock::ClockRef;
use crate::config::CoordinatorConfig;
use crate::core::builder::CoordinatorBuilder;
use crate::core::signals::{self, Controls, Intent};
use crate::core::worker::{Worker, WorkerSnapshot};
use crate::error::{RuntimeError, panic_message};
use crate::events::{Event, EventKind};
use crate::identity::ProcessIdentity;
use crate::monitor::{MemoryMonitor, MemoryStats, MemoryVerdict};
use crate::output::SinkRef;
use crate::store::{CoordinatorStatus, HealthRecord, HealthStore};

/// What the loop should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep ticking.
    Continue,
    /// Torn down; exit the process with this status.
    Exit(i32),
}

impl Flow {
    /// Whether the coordinator was torn down.
    pub fn is_exit(self) -> bool {
        matches!(self, Flow::Exit(_))
    }
}

/// Read-only view of a coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSnapshot {
    pub name: Arc<str>,
    pub pid: u32,
    pub status: CoordinatorStatus,
    pub terminated: bool,
    pub workers: Vec<WorkerSnapshot>,
    pub memory: MemoryStats,
}

/// Master supervisor.
pub struct Coordinator {
    name: Arc<str>,
    identity: ProcessIdentity,
    cfg: CoordinatorConfig,
    workers: Vec<Worker>,
    working: bool,
    exited: Option<i32>,

    monitor: MemoryMonitor,
    health: Arc<dyn HealthStore>,
    sink: SinkRef,
    clock: ClockRef,

    intents_tx: mpsc::UnboundedSender<Intent>,
    intents_rx: mpsc::UnboundedReceiver<Intent>,
}

impl Coordinator {
    /// Starts building a coordinator.
    pub fn builder(identity: ProcessIdentity, cfg: CoordinatorConfig) -> CoordinatorBuilder {
        CoordinatorBuilder::new(identity, cfg)
    }

    pub(crate) fn from_parts(
        identity: ProcessIdentity,
        cfg: CoordinatorConfig,
        monitor: MemoryMonitor,
        health: Arc<dyn HealthStore>,
        sink: SinkRef,
        clock: ClockRef,
    ) -> Self {
        let (intents_tx, intents_rx) = mpsc::unbounded_channel();
        Self {
            name: Arc::from(identity.process_name()),
            identity,
            cfg,
            workers: Vec::new(),
            working: true,
            exited: None,
            monitor,
            health,
            sink,
            clock,
            intents_tx,
            intents_rx,
        }
    }

    /// Appends `worker` to the pool. Duplicate names are allowed.
    ///
    /// A worker added while the coordinator is paused is paused as well.
    pub fn add_worker(&mut self, mut worker: Worker) {
        if !self.working {
            worker.pause();
        }
        let name = worker.name().to_string();
        self.workers.push(worker);
        self.emit(EventKind::WorkerAdded, |ev| ev.with_worker(name));
    }

    /// Handle for requesting lifecycle changes from other tasks.
    pub fn controls(&self) -> Controls {
        Controls::new(self.intents_tx.clone())
    }

    /// Runs the control loop until terminated; returns the exit status.
    ///
    /// Fails only if the signal handlers cannot be installed.
    pub async fn run(&mut self) -> Result<i32, RuntimeError> {
        let token = CancellationToken::new();
        let listener = signals::spawn_listener(self.intents_tx.clone(), token.clone())?;

        self.emit(EventKind::CoordinatorStarted, |ev| ev);
        if let Err(e) = self.persist().await {
            self.emit(EventKind::TickFailed, |ev| ev.with_reason(e.to_string()));
        }

        let status = loop {
            tokio::time::sleep(self.cfg.tick_interval()).await;
            if let Flow::Exit(status) = self.tick().await {
                break status;
            }
        };

        token.cancel();
        if let Err(e) = listener.await {
            debug!(error = %e, "signal listener ended abnormally");
        }
        Ok(status)
    }

    /// One iteration of the control loop. Never fails.
    pub async fn tick(&mut self) -> Flow {
        if let Some(status) = self.exited {
            return Flow::Exit(status);
        }

        let outcome = AssertUnwindSafe(self.try_tick()).catch_unwind().await;
        let err = match outcome {
            Ok(Ok(flow)) => return flow,
            Ok(Err(e)) => e,
            Err(panic) => RuntimeError::Panicked {
                info: panic_message(panic.as_ref()),
            },
        };
        self.emit(EventKind::TickFailed, |ev| {
            ev.with_reason(format!("{} ({})", err, err.as_label()))
        });
        Flow::Continue
    }

    async fn try_tick(&mut self) -> Result<Flow, RuntimeError> {
        while let Ok(intent) = self.intents_rx.try_recv() {
            if let Flow::Exit(status) = self.apply(intent).await {
                return Ok(Flow::Exit(status));
            }
        }

        if self.working {
            self.tick_workers().await;
            self.reap();
        }

        if self.monitor.tick() == MemoryVerdict::Restart {
            return Ok(self.restart().await);
        }

        self.persist().await?;
        Ok(Flow::Continue)
    }

    /// Ticks every worker concurrently. A panic is contained to the worker
    /// that raised it.
    async fn tick_workers(&mut self) {
        let outcomes = join_all(
            self.workers
                .iter_mut()
                .map(|w| AssertUnwindSafe(w.tick()).catch_unwind()),
        )
        .await;

        for (worker, outcome) in self.workers.iter().zip(outcomes) {
            if let Err(panic) = outcome {
                let err = RuntimeError::Panicked {
                    info: panic_message(panic.as_ref()),
                };
                let name = worker.name().to_string();
                self.emit(EventKind::TickFailed, |ev| {
                    ev.with_worker(name)
                        .with_reason(format!("{} ({})", err, err.as_label()))
                });
            }
        }
    }

    async fn apply(&mut self, intent: Intent) -> Flow {
        self.emit(EventKind::IntentReceived, |ev| ev.with_reason(intent.as_label()));
        match intent {
            Intent::Pause => {
                self.pause();
                Flow::Continue
            }
            Intent::Resume => {
                self.resume();
                Flow::Continue
            }
            Intent::Restart => self.restart().await,
            Intent::Terminate(status) => self.terminate(status).await,
        }
    }

    /// Removes workers that terminated themselves.
    fn reap(&mut self) {
        let (alive, dead): (Vec<Worker>, Vec<Worker>) = std::mem::take(&mut self.workers)
            .into_iter()
            .partition(|w| !w.is_terminated());
        self.workers = alive;

        for worker in dead {
            let name = worker.name().to_string();
            self.emit(EventKind::WorkerReaped, |ev| ev.with_worker(name));
        }
    }

    /// Stops ticking workers and pauses each of them.
    pub fn pause(&mut self) {
        if !self.working || self.exited.is_some() {
            return;
        }
        self.working = false;
        self.workers.iter_mut().for_each(Worker::pause);
        self.emit(EventKind::CoordinatorPaused, |ev| ev);
    }

    /// Resumes the coordinator and each worker.
    pub fn resume(&mut self) {
        if self.working || self.exited.is_some() {
            return;
        }
        self.working = true;
        self.workers.iter_mut().for_each(Worker::resume);
        self.emit(EventKind::CoordinatorResumed, |ev| ev);
    }

    /// Same as `terminate(0)`: an external process manager relaunches the process.
    pub async fn restart(&mut self) -> Flow {
        self.terminate(0).await
    }

    /// Terminates every worker, removes the health record and returns
    /// `Flow::Exit(status)`. Repeated calls keep the first status.
    pub async fn terminate(&mut self, status: i32) -> Flow {
        if let Some(status) = self.exited {
            return Flow::Exit(status);
        }
        self.working = false;

        for worker in self.workers.iter_mut() {
            worker.terminate().await;
        }
        self.workers.clear();

        if let Err(e) = self.health.forget(&self.name).await {
            self.emit(EventKind::CleanupFailed, |ev| ev.with_reason(e.to_string()));
        }

        self.exited = Some(status);
        self.emit(EventKind::CoordinatorStopped, |ev| ev.with_code(status));
        Flow::Exit(status)
    }

    async fn persist(&mut self) -> Result<(), RuntimeError> {
        let memory = self.monitor.memory_stats();
        let record = HealthRecord {
            pid: self.identity.pid(),
            status: self.status(),
            worker_count: self.workers.len(),
            memory_current_mb: memory.current_mb(),
            memory_peak_mb: memory.peak_mb(),
            updated_at: self.clock.now(),
        };
        self.health.update(&self.name, record.into_fields()?).await?;
        Ok(())
    }

    /// Coordinator name (`{app}-{token}`); key of the health record.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether workers are being ticked.
    pub fn is_working(&self) -> bool {
        self.working
    }

    pub fn status(&self) -> CoordinatorStatus {
        if self.working {
            CoordinatorStatus::Running
        } else {
            CoordinatorStatus::Paused
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Pooled workers in insertion order.
    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            name: self.name.clone(),
            pid: self.identity.pid(),
            status: self.status(),
            terminated: self.exited.is_some(),
            workers: self.workers.iter().map(Worker::snapshot).collect(),
            memory: self.monitor.last_stats(),
        }
    }

    fn emit(&self, kind: EventKind, f: impl FnOnce(Event) -> Event) {
        let ev = Event::new(kind)
            .at(self.clock.now())
            .with_worker(self.name.clone());
        self.sink.emit(&f(ev));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::error::StoreError;
    use crate::config::{MemoryConfig, WorkerConfig};
    use crate::core::worker::{WorkerContext, WorkerStatus};
    use crate::link::sim::{SimBroker, SimFactory};
    use crate::monitor::ManualProbe;
    use crate::output::RecordingSink;
    use crate::policies::{ExhaustionPolicy, RetryPolicy};
    use crate::store::WorkerRepository;
    use crate::store::memory::{MemoryHealthStore, MemoryWorkerRepository};

    struct Rig {
        coordinator: Coordinator,
        factory: Arc<SimFactory>,
        health: Arc<MemoryHealthStore>,
        repo: Arc<MemoryWorkerRepository>,
        probe: ManualProbe,
        clock: ManualClock,
        sink: Arc<RecordingSink>,
        identity: ProcessIdentity,
    }

    impl Rig {
        fn new(memory: MemoryConfig) -> Self {
            let clock = ManualClock::default();
            let sink = Arc::new(RecordingSink::default());
            let health = Arc::new(MemoryHealthStore::with_clock(
                Duration::from_secs(60),
                Arc::new(clock.clone()),
            ));
            let probe = ManualProbe::with_mb(10);
            let identity = ProcessIdentity::with_token("svc", 42, "abc123");

            let Ok(coordinator) = Coordinator::builder(identity.clone(), CoordinatorConfig::default())
                .with_health_store(health.clone())
                .with_sink(sink.clone())
                .with_clock(Arc::new(clock.clone()))
                .with_memory(memory, Arc::new(probe.clone()))
                .build()
            else {
                panic!("coordinator config rejected");
            };

            Self {
                coordinator,
                factory: Arc::new(SimFactory::new()),
                repo: Arc::new(MemoryWorkerRepository::with_clock(Arc::new(clock.clone()))),
                health,
                probe,
                clock,
                sink,
                identity,
            }
        }

        fn add(&mut self, connection: &str, retry: RetryPolicy) -> SimBroker {
            let broker = self.factory.add(connection);
            let ctx = WorkerContext::new(self.factory.clone(), self.repo.clone())
                .with_sink(self.sink.clone())
                .with_clock(Arc::new(self.clock.clone()));
            let cfg = WorkerConfig::new(connection).with_retry(retry);
            let Ok(worker) = Worker::new(&self.identity, cfg, ctx) else {
                panic!("worker config rejected");
            };
            self.coordinator.add_worker(worker);
            broker
        }

        async fn record(&self) -> Option<HealthRecord> {
            let fields = self.health.find("svc-abc123").await.unwrap()?;
            Some(HealthRecord::from_fields(fields).unwrap())
        }
    }

    struct CrashingRepository;

    #[async_trait]
    impl WorkerRepository for CrashingRepository {
        async fn touch(&self, _worker: &str) -> Result<(), StoreError> {
            panic!("liveness store crashed");
        }

        async fn delete(&self, _worker: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn fragile() -> RetryPolicy {
        RetryPolicy {
            max_retries: 1,
            on_exhausted: ExhaustionPolicy::Terminate,
            ..RetryPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_terminated_workers_are_reaped() {
        let mut r = Rig::new(MemoryConfig::default());
        r.add("healthy", RetryPolicy::default());
        let doomed = r.add("doomed", fragile());
        r.add("other", RetryPolicy::default());
        doomed.set_outage(true);

        assert_eq!(r.coordinator.tick().await, Flow::Continue);

        assert_eq!(r.coordinator.worker_count(), 2);
        let names: Vec<&str> = r.coordinator.workers().iter().map(Worker::name).collect();
        assert_eq!(names, vec!["svc-abc123:healthy", "svc-abc123:other"]);
        assert_eq!(r.sink.count(EventKind::WorkerReaped), 1);
        assert_eq!(r.record().await.unwrap().worker_count, 2);
    }

    #[tokio::test]
    async fn test_panicking_worker_does_not_stall_siblings() {
        let mut r = Rig::new(MemoryConfig::default());

        let crashing = r.factory.add("crashing");
        let ctx = WorkerContext::new(r.factory.clone(), Arc::new(CrashingRepository))
            .with_sink(r.sink.clone())
            .with_clock(Arc::new(r.clock.clone()));
        let Ok(worker) = Worker::new(&r.identity, WorkerConfig::new("crashing"), ctx) else {
            panic!("worker config rejected");
        };
        r.coordinator.add_worker(worker);

        let healthy = r.add("healthy", RetryPolicy::default());
        let flaky = r.add("flaky", RetryPolicy::default());
        flaky.panic_pumps(1);

        for _ in 0..3 {
            assert_eq!(r.coordinator.tick().await, Flow::Continue);
        }

        assert_eq!(crashing.connect_calls(), 1);
        assert_eq!(healthy.connect_calls(), 1);
        assert_eq!(healthy.pump_calls(), 3);
        assert_eq!(flaky.connect_calls(), 2);

        let failed: Vec<String> = r
            .sink
            .events()
            .into_iter()
            .filter(|e| e.kind == EventKind::TickFailed)
            .filter_map(|e| e.worker.as_deref().map(str::to_string))
            .collect();
        assert_eq!(failed, vec!["svc-abc123:crashing".to_string(); 3]);

        assert_eq!(r.coordinator.worker_count(), 3);
        assert_eq!(r.record().await.unwrap().worker_count, 3);
        assert!(r.repo.last_seen("svc-abc123:healthy").await.is_some());
        assert!(r.repo.last_seen("svc-abc123:flaky").await.is_some());
    }

    #[tokio::test]
    async fn test_intents_apply_at_next_tick() {
        let mut r = Rig::new(MemoryConfig::default());
        let broker = r.add("edge", RetryPolicy::default());
        let controls = r.coordinator.controls();

        controls.pause();
        assert!(r.coordinator.is_working());

        r.coordinator.tick().await;
        assert!(!r.coordinator.is_working());
        assert_eq!(broker.connect_calls(), 0);
        assert_eq!(r.record().await.unwrap().status, CoordinatorStatus::Paused);
        assert_eq!(r.sink.count(EventKind::IntentReceived), 1);

        controls.resume();
        r.coordinator.tick().await;
        assert_eq!(broker.connect_calls(), 1);
        assert_eq!(r.record().await.unwrap().status, CoordinatorStatus::Running);
    }

    #[tokio::test]
    async fn test_pause_cascades_to_workers() {
        let mut r = Rig::new(MemoryConfig::default());
        r.add("a", RetryPolicy::default());
        r.add("b", RetryPolicy::default());

        r.coordinator.pause();
        r.coordinator.pause();
        assert!(r.coordinator.workers().iter().all(|w| !w.is_working()));
        assert_eq!(r.sink.count(EventKind::CoordinatorPaused), 1);

        r.add("late", RetryPolicy::default());
        assert_eq!(
            r.coordinator.workers()[2].status(),
            WorkerStatus::Paused
        );

        r.coordinator.resume();
        assert!(r.coordinator.workers().iter().all(Worker::is_working));
    }

    #[tokio::test]
    async fn test_terminate_tears_everything_down() {
        let mut r = Rig::new(MemoryConfig::default());
        let broker = r.add("edge", RetryPolicy::default());
        r.coordinator.tick().await;
        assert!(r.record().await.is_some());

        r.coordinator.controls().terminate(5);
        assert_eq!(r.coordinator.tick().await, Flow::Exit(5));

        assert_eq!(broker.disconnect_calls(), 1);
        assert_eq!(r.repo.delete_calls(), 1);
        assert!(r.record().await.is_none());
        assert_eq!(r.coordinator.worker_count(), 0);
        assert!(r.coordinator.snapshot().terminated);

        assert_eq!(r.coordinator.terminate(9).await, Flow::Exit(5));
        assert_eq!(r.coordinator.tick().await, Flow::Exit(5));
        assert_eq!(r.sink.count(EventKind::CoordinatorStopped), 1);
    }

    #[tokio::test]
    async fn test_teardown_continues_when_cleanup_fails() {
        let mut r = Rig::new(MemoryConfig::default());
        let a = r.add("a", RetryPolicy::default());
        let b = r.add("b", RetryPolicy::default());
        r.coordinator.tick().await;

        a.fail_disconnects(true);
        r.health.set_unavailable(true);
        assert_eq!(r.coordinator.restart().await, Flow::Exit(0));

        assert_eq!(b.disconnect_calls(), 1);
        assert_eq!(r.repo.delete_calls(), 2);
        assert_eq!(r.sink.count(EventKind::CleanupFailed), 1);
    }

    #[tokio::test]
    async fn test_memory_restart_stops_the_loop() {
        let mut r = Rig::new(MemoryConfig {
            threshold_mb: Some(100),
            gc_interval_ticks: 1,
            auto_restart: true,
            restart_delay_secs: 30,
        });
        r.add("edge", RetryPolicy::default());
        r.probe.set_mb(150);

        assert_eq!(r.coordinator.tick().await, Flow::Continue);
        r.clock.advance(Duration::from_secs(30));
        assert_eq!(r.coordinator.tick().await, Flow::Exit(0));

        assert!(r.record().await.is_none());
        assert_eq!(r.sink.count(EventKind::RestartRequested), 1);
        assert_eq!(r.coordinator.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_persist_is_reported_and_loop_continues() {
        let mut r = Rig::new(MemoryConfig::default());
        r.add("edge", RetryPolicy::default());
        r.health.set_unavailable(true);

        assert_eq!(r.coordinator.tick().await, Flow::Continue);
        assert_eq!(r.sink.count(EventKind::TickFailed), 1);

        r.health.set_unavailable(false);
        assert_eq!(r.coordinator.tick().await, Flow::Continue);
        assert!(r.record().await.is_some());
    }

    #[tokio::test]
    async fn test_health_record_contents() {
        let mut r = Rig::new(MemoryConfig::default());
        r.add("edge", RetryPolicy::default());
        r.probe.set_mb(32);
        r.coordinator.tick().await;
        r.probe.set_mb(16);
        r.coordinator.tick().await;

        let record = r.record().await.unwrap();
        assert_eq!(record.pid, 42);
        assert_eq!(record.status, CoordinatorStatus::Running);
        assert_eq!(record.worker_count, 1);
        assert_eq!(record.memory_current_mb, 16.0);
        assert_eq!(record.memory_peak_mb, 32.0);
        assert_eq!(record.updated_at, r.clock.now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_terminate_status() {
        let mut r = Rig::new(MemoryConfig::default());
        let broker = r.add("edge", RetryPolicy::default());
        r.coordinator.controls().terminate(7);

        let status = r.coordinator.run().await.unwrap();
        assert_eq!(status, 7);
        assert_eq!(broker.connect_calls(), 0);
        assert_eq!(r.sink.count(EventKind::CoordinatorStarted), 1);
    }
}
