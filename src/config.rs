//! # Runtime settings.
//!
//! [`Settings`] gathers everything a supervisor process needs:
//!
//! - [`LoggingConfig`] level and format of the tracing subscriber;
//! - [`CoordinatorConfig`] tick interval and health-record TTL;
//! - [`MemoryConfig`] memory ceiling, collection cadence, auto-restart;
//! - one [`WorkerConfig`] per broker connection.
//!
//! ## Sources
//! [`Settings::load_from`] layers, lowest priority first:
//! 1. `<dir>/default.toml` (optional)
//! 2. `<dir>/$BROKERVISOR_ENV.toml` (optional, `development` when unset)
//! 3. environment variables `BROKERVISOR__<SECTION>__<KEY>`
//!
//! ## Example
//! ```
//! use brokervisor::Settings;
//!
//! let settings = Settings::from_toml_str(r#"
//!     [coordinator]
//!     tick_interval_ms = 500
//!
//!     [[workers]]
//!     connection = "edge"
//!     topic_prefix = "sensors"
//! "#).unwrap();
//!
//! assert_eq!(settings.workers[0].topic_filter(), "sensors/#");
//! assert_eq!(settings.coordinator.tick_interval().as_millis(), 500);
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::link::QoS;
use crate::policies::RetryPolicy;

/// Prefix of environment overrides and of the environment selector variable.
const ENV_PREFIX: &str = "BROKERVISOR";

/// Full settings of a supervisor process.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Log output.
    pub logging: LoggingConfig,
    /// Control loop.
    pub coordinator: CoordinatorConfig,
    /// Memory health.
    pub memory: MemoryConfig,
    /// One entry per supervised connection.
    pub workers: Vec<WorkerConfig>,
}

impl Settings {
    /// Loads settings from `<dir>/default.toml`, the environment file and env vars.
    pub fn load_from<P: AsRef<Path>>(dir: P) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let env_name =
            std::env::var(format!("{ENV_PREFIX}_ENV")).unwrap_or_else(|_| "development".into());

        let settings: Settings = Config::builder()
            .add_source(File::from(dir.join("default.toml")).required(false))
            .add_source(File::from(dir.join(format!("{env_name}.toml"))).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parses an inline TOML document (no files, no environment).
    pub fn from_toml_str(doc: &str) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(doc, FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.coordinator.validate()?;
        self.memory.validate()?;
        for worker in &self.workers {
            worker.validate()?;
        }
        Ok(())
    }
}

/// Tracing subscriber settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Control loop settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Application part of process names.
    pub app: String,
    /// Sleep between ticks in milliseconds.
    pub tick_interval_ms: u64,
    /// Lifetime of the persisted health record in seconds.
    pub health_ttl_secs: u64,
}

impl Default for CoordinatorConfig {
    /// - `app = "brokervisor"`
    /// - `tick_interval = 1s`
    /// - `health_ttl = 60s`
    fn default() -> Self {
        Self {
            app: "brokervisor".to_string(),
            tick_interval_ms: 1000,
            health_ttl_secs: 60,
        }
    }
}

impl CoordinatorConfig {
    /// Sleep between ticks.
    #[inline]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Health record TTL.
    #[inline]
    pub fn health_ttl(&self) -> Duration {
        Duration::from_secs(self.health_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::invalid("tick_interval_ms", "must be positive"));
        }
        if self.health_ttl_secs == 0 {
            return Err(ConfigError::invalid("health_ttl_secs", "must be positive"));
        }
        Ok(())
    }
}

/// Memory monitor settings.
///
/// ## Field semantics
/// - `threshold_mb`: memory ceiling; `None` disables threshold checks
/// - `gc_interval_ticks`: run a collection pass every N ticks (min 1)
/// - `auto_restart`: request a restart once above the ceiling for `restart_delay_secs`
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Memory ceiling in megabytes.
    pub threshold_mb: Option<u64>,
    /// Collection cadence in ticks.
    pub gc_interval_ticks: u32,
    /// Whether a sustained excess requests a restart.
    pub auto_restart: bool,
    /// Grace period above the ceiling before restarting, in seconds.
    pub restart_delay_secs: u64,
}

impl Default for MemoryConfig {
    /// - `threshold_mb = None` (disabled)
    /// - `gc_interval_ticks = 60`
    /// - `auto_restart = false`
    /// - `restart_delay = 60s`
    fn default() -> Self {
        Self {
            threshold_mb: None,
            gc_interval_ticks: 60,
            auto_restart: false,
            restart_delay_secs: 60,
        }
    }
}

impl MemoryConfig {
    /// Grace period above the ceiling.
    #[inline]
    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    /// Collection cadence clamped to a minimum of 1.
    #[inline]
    pub fn gc_interval_clamped(&self) -> u32 {
        self.gc_interval_ticks.max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold_mb == Some(0) {
            return Err(ConfigError::invalid("threshold_mb", "must be positive"));
        }
        Ok(())
    }
}

/// Immutable settings of one worker.
#[derive(Clone, Debug, Deserialize)]
pub struct WorkerConfig {
    /// Connection name, resolved through the connection factory.
    pub connection: String,
    /// Reconnect behavior.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Topic prefix to subscribe under.
    #[serde(default)]
    pub topic_prefix: String,
    /// Subscription QoS.
    #[serde(default)]
    pub qos: QoS,
}

impl WorkerConfig {
    /// Config with default policy, empty prefix and QoS 0.
    pub fn new(connection: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            retry: RetryPolicy::default(),
            topic_prefix: String::new(),
            qos: QoS::default(),
        }
    }

    /// Replaces the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the topic prefix.
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    /// Replaces the subscription QoS.
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Multi-level wildcard filter under `topic_prefix`.
    ///
    /// - `""` → `#`
    /// - `"a/b/"` → `a/b/#`
    /// - `"a/b"` → `a/b/#`
    pub fn topic_filter(&self) -> String {
        let prefix = self.topic_prefix.as_str();
        if prefix.is_empty() {
            "#".to_string()
        } else if prefix.ends_with('/') {
            format!("{prefix}#")
        } else {
            format!("{prefix}/#")
        }
    }

    /// Rejects empty names and invalid policies.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.trim().is_empty() {
            return Err(ConfigError::invalid("connection", "must not be empty"));
        }
        self.retry.validate()
    }
}
