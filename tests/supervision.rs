use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use brokervisor::{
    AuthSettings, Clock, ConnectSettings, Connection, ConnectionFactory, Coordinator,
    CoordinatorConfig, CoordinatorStatus, EventKind, ExhaustionPolicy, Flow, HealthRecord,
    HealthStore, LinkError, ManualClock, MemoryConfig, OnMessage, ProcessIdentity, QoS,
    RecordingSink, RetryPolicy, Worker, WorkerConfig, WorkerContext, WorkerStatus,
    link::sim::SimFactory,
    monitor::ManualProbe,
    store::memory::{MemoryHealthStore, MemoryWorkerRepository},
};

#[derive(Default)]
struct Calls {
    connect: AtomicU32,
    subscribe: AtomicU32,
    pump: AtomicU32,
}

/// Connection that refuses the first `failures` connects across all instances.
struct FlakyConnection {
    calls: Arc<Calls>,
    failures: u32,
    connected: bool,
}

#[async_trait]
impl Connection for FlakyConnection {
    async fn connect(
        &mut self,
        _settings: Option<&ConnectSettings>,
        _clean_session: bool,
    ) -> Result<(), LinkError> {
        let n = self.calls.connect.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failures {
            return Err(LinkError::Connect {
                reason: format!("refused #{n}"),
            });
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn subscribe(
        &mut self,
        _filter: &str,
        _on_message: OnMessage,
        _qos: QoS,
    ) -> Result<(), LinkError> {
        self.calls.subscribe.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pump_once(&mut self) -> Result<(), LinkError> {
        self.calls.pump.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FlakyFactory {
    calls: Arc<Calls>,
    failures: u32,
}

impl ConnectionFactory for FlakyFactory {
    fn create(&self, name: &str) -> Result<Box<dyn Connection>, LinkError> {
        if name != "edge" {
            return Err(LinkError::UnknownConnection { name: name.into() });
        }
        Ok(Box::new(FlakyConnection {
            calls: self.calls.clone(),
            failures: self.failures,
            connected: false,
        }))
    }

    fn auth_settings(&self, name: &str) -> Result<AuthSettings, LinkError> {
        if name != "edge" {
            return Err(LinkError::UnknownConnection { name: name.into() });
        }
        Ok(AuthSettings::default())
    }
}

struct Harness {
    identity: ProcessIdentity,
    clock: ManualClock,
    health: Arc<MemoryHealthStore>,
    repo: Arc<MemoryWorkerRepository>,
    sink: Arc<RecordingSink>,
}

impl Harness {
    fn new() -> Self {
        let clock = ManualClock::default();
        Self {
            identity: ProcessIdentity::with_token("ingest", 4242, "q1w2e3"),
            health: Arc::new(MemoryHealthStore::with_clock(
                Duration::from_secs(60),
                Arc::new(clock.clone()),
            )),
            repo: Arc::new(MemoryWorkerRepository::with_clock(Arc::new(clock.clone()))),
            sink: Arc::new(RecordingSink::default()),
            clock,
        }
    }

    fn context(&self, factory: Arc<dyn ConnectionFactory>) -> WorkerContext {
        WorkerContext::new(factory, self.repo.clone())
            .with_sink(self.sink.clone())
            .with_clock(Arc::new(self.clock.clone()))
    }

    fn coordinator(&self, workers: Vec<Worker>) -> Coordinator {
        Coordinator::builder(self.identity.clone(), CoordinatorConfig::default())
            .with_health_store(self.health.clone())
            .with_sink(self.sink.clone())
            .with_clock(Arc::new(self.clock.clone()))
            .with_memory(MemoryConfig::default(), Arc::new(ManualProbe::with_mb(24)))
            .with_workers(workers)
            .build()
            .unwrap()
    }

    async fn record(&self) -> Option<HealthRecord> {
        let fields = self.health.find("ingest-q1w2e3").await.unwrap()?;
        Some(HealthRecord::from_fields(fields).unwrap())
    }
}

#[tokio::test]
async fn test_worker_recovers_after_two_failed_connects() {
    let h = Harness::new();
    let calls = Arc::new(Calls::default());
    let factory = Arc::new(FlakyFactory {
        calls: calls.clone(),
        failures: 2,
    });
    let worker = Worker::new(&h.identity, WorkerConfig::new("edge"), h.context(factory)).unwrap();
    let mut coordinator = h.coordinator(vec![worker]);

    assert_eq!(coordinator.tick().await, Flow::Continue);
    h.clock.advance(Duration::from_secs(1));
    assert_eq!(coordinator.tick().await, Flow::Continue);
    h.clock.advance(Duration::from_secs(2));
    assert_eq!(coordinator.tick().await, Flow::Continue);

    assert_eq!(calls.connect.load(Ordering::SeqCst), 3);
    assert_eq!(calls.subscribe.load(Ordering::SeqCst), 1);
    assert_eq!(calls.pump.load(Ordering::SeqCst), 1);

    let record = h.record().await.unwrap();
    assert_eq!(record.status, CoordinatorStatus::Running);
    assert_eq!(record.pid, 4242);
    assert_eq!(record.worker_count, 1);
    assert_eq!(record.memory_current_mb, 24.0);
    assert_eq!(record.updated_at, h.clock.now());

    assert_eq!(h.sink.count(EventKind::ConnectFailed), 2);
    assert_eq!(h.sink.count(EventKind::WorkerRecovered), 1);
    assert_eq!(
        h.repo.last_seen("ingest-q1w2e3:edge").await,
        Some(h.clock.now())
    );
}

#[tokio::test]
async fn test_failing_worker_does_not_affect_siblings() {
    let h = Harness::new();
    let factory = Arc::new(SimFactory::new());
    let steady = factory.add("steady");
    let broken = factory.add("broken");
    broken.set_outage(true);

    let breaker = RetryPolicy {
        max_retries: 100,
        max_retry_delay_secs: 1,
        max_failure_duration_secs: 3,
        on_exhausted: ExhaustionPolicy::Cooldown,
    };
    let workers = vec![
        Worker::new(&h.identity, WorkerConfig::new("steady"), h.context(factory.clone())).unwrap(),
        Worker::new(
            &h.identity,
            WorkerConfig::new("broken").with_retry(breaker),
            h.context(factory.clone()),
        )
        .unwrap(),
    ];
    let mut coordinator = h.coordinator(workers);

    for _ in 0..4 {
        coordinator.tick().await;
        h.clock.advance(Duration::from_secs(1));
    }

    assert_eq!(coordinator.worker_count(), 1);
    assert_eq!(coordinator.workers()[0].status(), WorkerStatus::Connected);
    assert_eq!(steady.connect_calls(), 1);
    assert_eq!(steady.pump_calls(), 4);
    assert_eq!(broken.connect_calls(), 4);
    assert_eq!(h.sink.count(EventKind::CircuitOpened), 1);
    assert_eq!(h.repo.names().await, vec!["ingest-q1w2e3:steady".to_string()]);
    assert_eq!(h.record().await.unwrap().worker_count, 1);
}

#[tokio::test]
async fn test_health_record_goes_stale_after_pause_stops_workers() {
    let h = Harness::new();
    let factory = Arc::new(SimFactory::new());
    factory.add("edge");
    let worker = Worker::new(&h.identity, WorkerConfig::new("edge"), h.context(factory)).unwrap();
    let mut coordinator = h.coordinator(vec![worker]);
    let controls = coordinator.controls();

    coordinator.tick().await;
    controls.pause();
    coordinator.tick().await;
    assert_eq!(h.record().await.unwrap().status, CoordinatorStatus::Paused);

    // Paused workers stop refreshing their liveness rows.
    h.clock.advance(Duration::from_secs(45));
    coordinator.tick().await;
    assert_eq!(
        h.repo.stale(Duration::from_secs(30)).await,
        vec!["ingest-q1w2e3:edge".to_string()]
    );

    controls.terminate(0);
    assert_eq!(coordinator.tick().await, Flow::Exit(0));
    assert!(h.record().await.is_none());
    assert!(h.repo.names().await.is_empty());
}
