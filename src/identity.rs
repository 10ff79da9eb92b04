//! # Process identity.
//!
//! A [`ProcessIdentity`] is created once at startup and threaded into the
//! coordinator and every worker. It names the coordinator's health record and each
//! worker's liveness row, so two processes on the same host never collide.

use std::fmt;

use rand::{Rng, distr::Alphanumeric};

/// Length of the random token appended to process names.
const TOKEN_LEN: usize = 6;

/// Identity of the running supervisor process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    app: String,
    pid: u32,
    token: String,
}

impl ProcessIdentity {
    /// Creates an identity for this process with a fresh random token.
    ///
    /// # Example
    /// ```
    /// use brokervisor::ProcessIdentity;
    ///
    /// let id = ProcessIdentity::generate("mqtt");
    /// assert!(id.process_name().starts_with("mqtt-"));
    /// assert_eq!(id.pid(), std::process::id());
    /// ```
    pub fn generate(app: impl Into<String>) -> Self {
        let token: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        Self::with_token(app, std::process::id(), token)
    }

    /// Creates an identity with explicit parts (deterministic names in tests).
    pub fn with_token(app: impl Into<String>, pid: u32, token: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            pid,
            token: token.into(),
        }
    }

    /// Operating-system process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Random token distinguishing this process.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Name of the coordinator (`{app}-{token}`).
    pub fn process_name(&self) -> String {
        format!("{}-{}", self.app, self.token)
    }

    /// Name of the worker supervising `connection` (`{app}-{token}:{connection}`).
    pub fn worker_name(&self, connection: &str) -> String {
        format!("{}-{}:{}", self.app, self.token, connection)
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (pid {})", self.process_name(), self.pid)
    }
}
