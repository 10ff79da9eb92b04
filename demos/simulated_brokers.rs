//! Supervises simulated brokers until SIGINT/SIGTERM.
//!
//! ```text
//! cargo run --example simulated_brokers
//! BROKERVISOR__MEMORY__THRESHOLD_MB=512 cargo run --example simulated_brokers
//! kill -USR2 <pid>   # pause
//! kill -CONT <pid>   # resume
//! ```
//!
//! Reads `config/default.toml` when present. Without workers in the settings it
//! supervises two brokers: `edge` (healthy) and `flaky` (refuses the first
//! connects and drops its session every few seconds).

use std::sync::Arc;
use std::time::Duration;

use brokervisor::{
    Coordinator, LogSink, OutputSink, ProcessIdentity, ProcessMemory, RecordingSink, Settings,
    SinkSet, Worker, WorkerConfig, WorkerContext, init_tracing,
    link::sim::SimFactory,
    notify::ChannelNotifier,
    store::memory::MemoryWorkerRepository,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = Settings::load_from("config")?;
    init_tracing(&settings.logging);

    if settings.workers.is_empty() {
        settings.workers = vec![
            WorkerConfig::new("edge").with_topic_prefix("sensors"),
            WorkerConfig::new("flaky").with_topic_prefix("alerts/"),
        ];
    }

    let identity = ProcessIdentity::generate(settings.coordinator.app.clone());
    info!(%identity, "starting");

    let recorder = Arc::new(RecordingSink::new(256));
    let sinks = vec![
        Arc::new(LogSink) as Arc<dyn OutputSink>,
        recorder.clone() as Arc<dyn OutputSink>,
    ];
    let sink = Arc::new(SinkSet::new(sinks));

    let factory = Arc::new(SimFactory::new());
    let brokers: Vec<_> = settings
        .workers
        .iter()
        .map(|w| (w.topic_prefix.clone(), factory.add(w.connection.clone())))
        .collect();
    if let Some(flaky) = factory.broker("flaky") {
        flaky.fail_connects(2);
    }

    let (notifier, mut inbox) = ChannelNotifier::channel();
    tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            info!(
                worker = %message.worker,
                topic = %message.topic,
                payload = message.payload_str().unwrap_or("<binary>"),
                "message received"
            );
        }
    });

    tokio::spawn(async move {
        let mut n: u64 = 0;
        loop {
            tokio::time::sleep(Duration::from_millis(700)).await;
            n += 1;
            for (prefix, broker) in &brokers {
                let prefix = prefix.trim_end_matches('/');
                broker.publish(format!("{prefix}/reading"), format!("{n}"));
                if n % 10 == 0 && prefix == "alerts" {
                    broker.drop_sessions();
                }
            }
        }
    });

    let ctx = WorkerContext::new(factory, Arc::new(MemoryWorkerRepository::new()))
        .with_notifier(Arc::new(notifier))
        .with_sink(sink.clone());
    let workers = settings
        .workers
        .iter()
        .cloned()
        .map(|cfg| Worker::new(&identity, cfg, ctx.clone()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut coordinator = Coordinator::builder(identity, settings.coordinator.clone())
        .with_sink(sink)
        .with_memory(settings.memory.clone(), Arc::new(ProcessMemory))
        .with_workers(workers)
        .build()?;

    let status = coordinator.run().await?;
    info!(
        status,
        errors = recorder.at_least(brokervisor::Level::Error).len(),
        "stopped"
    );
    std::process::exit(status);
}
