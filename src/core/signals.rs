//! # Deferred lifecycle requests.
//!
//! OS signals and [`Controls`] calls never touch coordinator state directly. They
//! enqueue an [`Intent`]; the coordinator drains the queue at the top of its next
//! tick and applies each intent synchronously.
//!
//! ## Signals
//! **Unix platforms:**
//! - `SIGTERM`, `SIGINT` → [`Intent::Terminate`] with status `0`
//! - `SIGUSR1` → [`Intent::Restart`]
//! - `SIGUSR2` → [`Intent::Pause`]
//! - `SIGCONT` → [`Intent::Resume`]
//!
//! **Other platforms:**
//! - `Ctrl-C` via [`tokio::signal::ctrl_c`] → [`Intent::Terminate`]

use std::fmt;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lifecycle request applied at the next tick boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Tear down and exit with the given status.
    Terminate(i32),
    /// Tear down so an external process manager relaunches the process.
    Restart,
    /// Stop ticking workers.
    Pause,
    /// Resume ticking workers.
    Resume,
}

impl Intent {
    /// Short stable label (snake_case) for logs.
    pub fn as_label(self) -> &'static str {
        match self {
            Intent::Terminate(_) => "terminate",
            Intent::Restart => "restart",
            Intent::Pause => "pause",
            Intent::Resume => "resume",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Cloneable handle that sends intents to a coordinator.
///
/// # Example
/// ```
/// use brokervisor::{Coordinator, CoordinatorConfig, ProcessIdentity};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let identity = ProcessIdentity::with_token("svc", 1, "abc123");
/// let mut coordinator = Coordinator::builder(identity, CoordinatorConfig::default())
///     .build()
///     .unwrap();
///
/// let controls = coordinator.controls();
/// controls.terminate(3);
/// assert!(coordinator.tick().await.is_exit());
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Controls {
    tx: mpsc::UnboundedSender<Intent>,
}

impl Controls {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Intent>) -> Self {
        Self { tx }
    }

    /// Requests a pause.
    pub fn pause(&self) {
        self.send(Intent::Pause);
    }

    /// Requests a resume.
    pub fn resume(&self) {
        self.send(Intent::Resume);
    }

    /// Requests a restart.
    pub fn restart(&self) {
        self.send(Intent::Restart);
    }

    /// Requests termination with `status`.
    pub fn terminate(&self, status: i32) {
        self.send(Intent::Terminate(status));
    }

    /// Enqueues `intent`. Silently dropped once the coordinator is gone.
    pub fn send(&self, intent: Intent) {
        if self.tx.send(intent).is_err() {
            debug!(intent = %intent, "coordinator gone, intent dropped");
        }
    }
}

/// Installs signal handlers and forwards signals as intents until `token` is cancelled.
///
/// Handlers are registered before this returns, so registration errors surface
/// to the caller.
#[cfg(unix)]
pub fn spawn_listener(
    tx: mpsc::UnboundedSender<Intent>,
    token: CancellationToken,
) -> std::io::Result<JoinHandle<()>> {
    use nix::sys::signal::Signal;
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;
    let mut sigusr2 = signal(SignalKind::user_defined2())?;
    let mut sigcont = signal(SignalKind::from_raw(Signal::SIGCONT as i32))?;

    Ok(tokio::spawn(async move {
        loop {
            let intent = tokio::select! {
                _ = token.cancelled() => break,
                _ = sigterm.recv() => Intent::Terminate(0),
                _ = sigint.recv() => Intent::Terminate(0),
                _ = sigusr1.recv() => Intent::Restart,
                _ = sigusr2.recv() => Intent::Pause,
                _ = sigcont.recv() => Intent::Resume,
            };
            debug!(intent = %intent, "signal received");
            if tx.send(intent).is_err() {
                break;
            }
        }
    }))
}

/// Forwards Ctrl-C as [`Intent::Terminate`] until `token` is cancelled.
#[cfg(not(unix))]
pub fn spawn_listener(
    tx: mpsc::UnboundedSender<Intent>,
    token: CancellationToken,
) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                res = tokio::signal::ctrl_c() => {
                    if res.is_err() || tx.send(Intent::Terminate(0)).is_err() {
                        break;
                    }
                }
            }
        }
    }))
}
