//! # Worker: single-connection supervisor.
//!
//! Keeps one broker connection alive: connects, subscribes, pumps its event loop
//! once per tick and recovers from failures on its own backoff clock.
//!
//! ## State machine
//! ```text
//!                 tick, backoff allows
//!  Disconnected ───────────────────────► connect + subscribe
//!       ▲                                   │ ok            │ err
//!       │ is_connected() == false           ▼               ▼
//!       └──────────────────────────── Connected          Retrying
//!                                     (pump, touch)   (retry_count++, delay = 2^(n-1) capped)
//!                                                          │
//!                         failures span max_failure_duration ──► Terminated (circuit open)
//!                         retry_count reaches max_retries:
//!                             Terminate policy ─────────────────► Terminated
//!                             Cooldown policy  ──► retry_count = 0, delay = cap
//!
//!  pause() ─► Paused (tick is a no-op, connection left open)
//!  resume() ─► previous state, backoff clock untouched
//!  terminate() ─► Terminated (best-effort disconnect, liveness row deleted)
//! ```
//!
//! ## Rules
//! - Only [`Worker::tick`] touches the backoff clock, and it takes `&mut self`, so
//!   a worker never runs two ticks at once.
//! - "Retry now?" is checked before a connection is even created, so a worker in
//!   its backoff window does nothing.
//! - Connect and subscribe failures feed the backoff clock. Pump and liveness
//!   failures are operational: reported, and the connection is kept.
//! - A panic inside the connection is contained. During connect or subscribe it
//!   counts as a connect failure; during a pump the connection is dropped and
//!   the next tick reconnects.
//! - Inbound messages are queued by the connection callback and delivered to the
//!   [`NotificationSink`] after the pump; sink errors and panics are reported only.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::clock::{ClockRef, SystemClock, elapsed_at_least, rewind_if_ahead};
use crate::config::WorkerConfig;
use crate::error::{ConfigError, LinkError, panic_message};
use crate::events::{Event, EventKind};
use crate::identity::ProcessIdentity;
use crate::link::{AuthSettings, Connection, ConnectionFactory, Message, OnMessage};
use crate::notify::{InboundMessage, NotificationSink, NullNotifier};
use crate::output::{NullSink, SinkRef};
use crate::policies::BackoffPolicy;
use crate::store::WorkerRepository;

/// Collaborators shared by workers.
#[derive(Clone)]
pub struct WorkerContext {
    /// Produces connections by name.
    pub factory: Arc<dyn ConnectionFactory>,
    /// Liveness rows.
    pub repository: Arc<dyn WorkerRepository>,
    /// Receives inbound messages.
    pub notifier: Arc<dyn NotificationSink>,
    /// Receives diagnostics.
    pub sink: SinkRef,
    /// Time source for the backoff clock and circuit breaker.
    pub clock: ClockRef,
}

impl WorkerContext {
    /// Context with no notifications, no diagnostics and the system clock.
    pub fn new(factory: Arc<dyn ConnectionFactory>, repository: Arc<dyn WorkerRepository>) -> Self {
        Self {
            factory,
            repository,
            notifier: Arc::new(NullNotifier),
            sink: Arc::new(NullSink),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the notification sink.
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replaces the diagnostics sink.
    pub fn with_sink(mut self, sink: SinkRef) -> Self {
        self.sink = sink;
        self
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: ClockRef) -> Self {
        self.clock = clock;
        self
    }
}

/// Lifecycle state derived from a worker's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// No connection and no failure streak.
    Disconnected,
    /// Waiting out a backoff delay after one or more failures.
    Retrying,
    /// Connected and subscribed.
    Connected,
    /// Paused by the operator.
    Paused,
    /// Terminated; no further ticks.
    Terminated,
}

impl WorkerStatus {
    /// Short stable label (snake_case) for logs and dashboards.
    pub fn as_label(self) -> &'static str {
        match self {
            WorkerStatus::Disconnected => "disconnected",
            WorkerStatus::Retrying => "retrying",
            WorkerStatus::Connected => "connected",
            WorkerStatus::Paused => "paused",
            WorkerStatus::Terminated => "terminated",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Read-only view of a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSnapshot {
    pub name: Arc<str>,
    pub connection: String,
    pub status: WorkerStatus,
    pub retry_count: u32,
    pub retry_delay: Duration,
    /// Failures since the last successful connect (not reset by cooldown).
    pub consecutive_failures: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub first_failure_at: Option<DateTime<Utc>>,
    pub messages_received: u64,
}

/// Supervisor of one broker connection.
pub struct Worker {
    name: Arc<str>,
    cfg: WorkerConfig,
    auth: AuthSettings,
    filter: String,
    backoff: BackoffPolicy,
    ctx: WorkerContext,

    connection: Option<Box<dyn Connection>>,
    working: bool,
    terminated: bool,

    retry_count: u32,
    retry_delay: Duration,
    last_retry_at: Option<DateTime<Utc>>,
    first_failure_at: Option<DateTime<Utc>>,
    consecutive_failures: u32,

    on_message: OnMessage,
    inbox: mpsc::UnboundedReceiver<Message>,
    messages_received: u64,
}

impl Worker {
    /// Creates a worker for `cfg.connection`.
    ///
    /// Fails fast when the policy is invalid or the factory does not know the
    /// connection name.
    pub fn new(
        identity: &ProcessIdentity,
        cfg: WorkerConfig,
        ctx: WorkerContext,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let auth = ctx
            .factory
            .auth_settings(&cfg.connection)
            .map_err(|e| match e {
                LinkError::UnknownConnection { name } => ConfigError::UnknownConnection { name },
                other => ConfigError::invalid("connection", other.to_string()),
            })?;

        let (tx, inbox) = mpsc::unbounded_channel();
        let on_message: OnMessage = Arc::new(move |message| {
            let _ = tx.send(message);
        });
        let backoff = cfg.retry.backoff();

        Ok(Self {
            name: Arc::from(identity.worker_name(&cfg.connection)),
            filter: cfg.topic_filter(),
            retry_delay: backoff.first,
            backoff,
            cfg,
            auth,
            ctx,
            connection: None,
            working: true,
            terminated: false,
            retry_count: 0,
            last_retry_at: None,
            first_failure_at: None,
            consecutive_failures: 0,
            on_message,
            inbox,
            messages_received: 0,
        })
    }

    /// Runs one step of the state machine. Never fails: every error is reported
    /// through the diagnostics sink.
    pub async fn tick(&mut self) {
        if !self.working {
            return;
        }

        if self.connection.as_ref().is_some_and(|c| c.is_connected()) {
            self.pump().await;
            return;
        }
        if self.connection.take().is_some() {
            debug!(worker = %self.name, "connection lost");
        }

        let now = self.ctx.clock.now();
        rewind_if_ahead(&mut self.last_retry_at, now);
        rewind_if_ahead(&mut self.first_failure_at, now);
        if !self.should_retry(now) {
            return;
        }

        let opened = AssertUnwindSafe(self.open())
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(LinkError::Connect {
                    reason: format!("panicked: {}", panic_message(panic.as_ref())),
                })
            });
        match opened {
            Ok(connection) => {
                self.connection = Some(connection);
                self.on_connected();
                self.pump().await;
            }
            Err(err) => self.on_connect_failure(now, err).await,
        }
    }

    /// Stops ticking without closing the connection.
    pub fn pause(&mut self) {
        if self.terminated || !self.working {
            return;
        }
        self.working = false;
        self.emit(EventKind::WorkerPaused, |ev| ev);
    }

    /// Resumes ticking. A terminated worker stays terminated.
    pub fn resume(&mut self) {
        if self.terminated || self.working {
            return;
        }
        self.working = true;
        self.emit(EventKind::WorkerResumed, |ev| ev);
    }

    /// Stops the worker for good: best-effort disconnect, then removes its
    /// liveness row. Calling it again does nothing.
    pub async fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.working = false;

        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.disconnect().await {
                debug!(worker = %self.name, error = %e, "disconnect failed during terminate");
            }
        }
        if let Err(e) = self.ctx.repository.delete(&self.name).await {
            self.emit(EventKind::CleanupFailed, |ev| ev.with_reason(e.to_string()));
        }
        self.emit(EventKind::WorkerTerminated, |ev| ev);
    }

    /// Whether the worker is ticking (not paused, not terminated).
    #[inline]
    pub fn is_working(&self) -> bool {
        self.working
    }

    /// Whether [`terminate`](Self::terminate) ran.
    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Worker name (`{app}-{token}:{connection}`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Settings this worker was built with.
    pub fn config(&self) -> &WorkerConfig {
        &self.cfg
    }

    /// Failures counted against `max_retries`.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Current backoff delay.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Current backoff delay in whole seconds.
    pub fn retry_delay_secs(&self) -> u64 {
        self.retry_delay.as_secs()
    }

    pub fn status(&self) -> WorkerStatus {
        if self.terminated {
            WorkerStatus::Terminated
        } else if !self.working {
            WorkerStatus::Paused
        } else if self.connection.as_ref().is_some_and(|c| c.is_connected()) {
            WorkerStatus::Connected
        } else if self.first_failure_at.is_some() {
            WorkerStatus::Retrying
        } else {
            WorkerStatus::Disconnected
        }
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            name: self.name.clone(),
            connection: self.cfg.connection.clone(),
            status: self.status(),
            retry_count: self.retry_count,
            retry_delay: self.retry_delay,
            consecutive_failures: self.consecutive_failures,
            last_retry_at: self.last_retry_at,
            first_failure_at: self.first_failure_at,
            messages_received: self.messages_received,
        }
    }

    fn should_retry(&self, now: DateTime<Utc>) -> bool {
        match self.last_retry_at {
            None => true,
            Some(last) => elapsed_at_least(last, now, self.retry_delay),
        }
    }

    /// Creates, connects and subscribes a fresh connection.
    async fn open(&self) -> Result<Box<dyn Connection>, LinkError> {
        let mut connection = self.ctx.factory.create(&self.cfg.connection)?;
        connection
            .connect(self.auth.settings.as_ref(), self.auth.clean_session)
            .await?;

        let subscribed = connection
            .subscribe(&self.filter, self.on_message.clone(), self.cfg.qos)
            .await;
        if let Err(err) = subscribed {
            if let Err(e) = connection.disconnect().await {
                debug!(worker = %self.name, error = %e, "disconnect after failed subscribe");
            }
            return Err(err);
        }
        Ok(connection)
    }

    fn on_connected(&mut self) {
        let failures = self.consecutive_failures;

        self.retry_count = 0;
        self.retry_delay = self.backoff.first;
        self.last_retry_at = None;
        self.first_failure_at = None;
        self.consecutive_failures = 0;

        if failures > 0 {
            self.emit(EventKind::WorkerRecovered, |ev| ev.with_failures(failures));
        } else {
            let filter = self.filter.clone();
            self.emit(EventKind::WorkerConnected, |ev| ev.with_reason(filter));
        }
    }

    async fn on_connect_failure(&mut self, now: DateTime<Utc>, err: LinkError) {
        let policy = self.cfg.retry;

        self.retry_count += 1;
        self.consecutive_failures += 1;
        self.retry_delay = self.backoff.delay_after(self.retry_count);
        self.last_retry_at = Some(now);
        let first_failure = *self.first_failure_at.get_or_insert(now);

        let (attempt, delay) = (self.retry_count, self.retry_delay);
        self.emit(EventKind::ConnectFailed, |ev| {
            ev.with_attempt(attempt, policy.max_retries)
                .with_delay(delay)
                .with_reason(err.to_string())
        });

        let window = policy.max_failure_duration();
        if elapsed_at_least(first_failure, now, window) {
            self.emit(EventKind::CircuitOpened, |ev| ev.with_delay(window));
            self.terminate().await;
            return;
        }

        if self.retry_count >= policy.max_retries {
            if policy.terminates_on_exhaustion() {
                self.emit(EventKind::RetriesExhausted, |ev| ev.with_failures(attempt));
                self.terminate().await;
            } else {
                self.retry_count = 0;
                self.retry_delay = policy.max_retry_delay();
                let cooldown = self.retry_delay;
                self.emit(EventKind::RetryCooldown, |ev| ev.with_delay(cooldown));
            }
        }
    }

    /// Pumps the connection once, delivers queued messages and refreshes liveness.
    async fn pump(&mut self) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        let pumped = AssertUnwindSafe(connection.pump_once()).catch_unwind().await;
        match pumped {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.emit(EventKind::OperationalError, |ev| ev.with_reason(e.to_string()));
            }
            Err(panic) => {
                self.connection = None;
                let info = panic_message(panic.as_ref());
                self.emit(EventKind::OperationalError, |ev| {
                    ev.with_reason(format!("event loop panicked: {info}"))
                });
                return;
            }
        }

        self.deliver().await;

        if let Err(e) = self.ctx.repository.touch(&self.name).await {
            self.emit(EventKind::OperationalError, |ev| ev.with_reason(e.to_string()));
        }
    }

    async fn deliver(&mut self) {
        while let Ok(message) = self.inbox.try_recv() {
            self.messages_received += 1;
            let inbound = InboundMessage {
                topic: message.topic,
                payload: message.payload,
                worker: self.name.clone(),
                received_at: self.ctx.clock.now(),
            };

            let outcome = AssertUnwindSafe(self.ctx.notifier.notify(&inbound))
                .catch_unwind()
                .await;
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
            };
            let topic = inbound.topic;
            self.emit(EventKind::NotifyFailed, |ev| {
                ev.with_reason(format!("{topic}: {failure}"))
            });
        }
    }

    fn emit(&self, kind: EventKind, f: impl FnOnce(Event) -> Event) {
        let ev = Event::new(kind)
            .at(self.ctx.clock.now())
            .with_worker(self.name.clone());
        self.ctx.sink.emit(&f(ev));
    }
}
