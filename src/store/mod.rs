//! # Liveness and health persistence.
//!
//! Two repositories sit behind the supervisor:
//!
//! - [`WorkerRepository`] one row per worker, touched while the worker is connected
//!   and deleted when it terminates;
//! - [`HealthStore`] a TTL-bounded key/value record per coordinator, rewritten every
//!   tick. A record that expired means the coordinator died without a clean shutdown.
//!
//! The coordinator's record is a [`HealthRecord`]; its serialized field names are the
//! only contract shared with external health checks:
//!
//! ```text
//! { "pid": 4242, "status": "running", "workerCount": 3,
//!   "memoryCurrentMb": 41.5, "memoryPeakMb": 57.25, "updatedAt": "2026-…Z" }
//! ```

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

/// Field map stored per health record.
pub type Fields = Map<String, Value>;

/// Worker liveness rows.
#[async_trait]
pub trait WorkerRepository: Send + Sync {
    /// Creates or refreshes the worker's row.
    async fn touch(&self, worker: &str) -> Result<(), StoreError>;

    /// Removes the worker's row.
    async fn delete(&self, worker: &str) -> Result<(), StoreError>;
}

/// TTL-bounded health records.
#[async_trait]
pub trait HealthStore: Send + Sync {
    /// Merges `fields` into the record and refreshes its TTL.
    async fn update(&self, name: &str, fields: Fields) -> Result<(), StoreError>;

    /// Returns the record, or `None` if absent or expired.
    async fn find(&self, name: &str) -> Result<Option<Fields>, StoreError>;

    /// Removes the record.
    async fn forget(&self, name: &str) -> Result<(), StoreError>;
}

/// Coordinator status as seen by health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorStatus {
    /// Ticking workers.
    Running,
    /// Paused by an operator.
    Paused,
}

impl fmt::Display for CoordinatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorStatus::Running => write!(f, "running"),
            CoordinatorStatus::Paused => write!(f, "paused"),
        }
    }
}

/// Snapshot persisted by the coordinator every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub pid: u32,
    pub status: CoordinatorStatus,
    pub worker_count: usize,
    pub memory_current_mb: f64,
    pub memory_peak_mb: f64,
    pub updated_at: DateTime<Utc>,
}

impl HealthRecord {
    /// Converts into a field map for [`HealthStore::update`].
    pub fn into_fields(self) -> Result<Fields, StoreError> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Fields::new()),
        }
    }

    /// Rebuilds a record from a field map returned by [`HealthStore::find`].
    pub fn from_fields(fields: Fields) -> Result<Self, StoreError> {
        Ok(serde_json::from_value(Value::Object(fields))?)
    }
}
