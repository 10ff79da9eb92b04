//! # In-memory store implementations.
//!
//! Reference implementations of [`WorkerRepository`] and [`HealthStore`] for single
//! process deployments, demos and tests. Both read time from a [`Clock`](crate::Clock), so expiry
//! and staleness can be tested without sleeping, and both can be switched into an
//! "unavailable" mode to exercise error paths.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;

use crate::clock::{ClockRef, SystemClock, elapsed_at_least};
use crate::error::StoreError;
use crate::store::{Fields, HealthStore, WorkerRepository};

fn unavailable() -> StoreError {
    StoreError::Unavailable {
        reason: "store marked unavailable".into(),
    }
}

struct Entry {
    fields: Fields,
    expires_at: DateTime<Utc>,
}

/// TTL-bounded health records kept in a map.
pub struct MemoryHealthStore {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
    clock: ClockRef,
    down: AtomicBool,
}

impl MemoryHealthStore {
    /// Creates a store whose records expire `ttl` after their last update.
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    /// Same as [`new`](Self::new) with an explicit clock.
    pub fn with_clock(ttl: Duration, clock: ClockRef) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            clock,
            down: AtomicBool::new(false),
        }
    }

    /// While `down`, every call fails with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Number of live (unexpired) records.
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    /// Whether no live record exists.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(unavailable())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl HealthStore for MemoryHealthStore {
    async fn update(&self, name: &str, fields: Fields) -> Result<(), StoreError> {
        self.check()?;
        let now = self.clock.now();
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.expires_at > now);
        let entry = entries.entry(name.to_string()).or_insert_with(|| Entry {
            fields: Fields::new(),
            expires_at,
        });
        entry.fields.extend(fields);
        entry.expires_at = expires_at;
        Ok(())
    }

    async fn find(&self, name: &str) -> Result<Option<Fields>, StoreError> {
        self.check()?;
        let now = self.clock.now();
        Ok(self
            .entries
            .read()
            .await
            .get(name)
            .filter(|e| e.expires_at > now)
            .map(|e| e.fields.clone()))
    }

    async fn forget(&self, name: &str) -> Result<(), StoreError> {
        self.check()?;
        self.entries.write().await.remove(name);
        Ok(())
    }
}

/// Worker liveness rows kept in a map (`worker → last touch`).
pub struct MemoryWorkerRepository {
    rows: RwLock<HashMap<String, DateTime<Utc>>>,
    clock: ClockRef,
    down: AtomicBool,
    deletes: AtomicU32,
}

impl Default for MemoryWorkerRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWorkerRepository {
    /// Creates an empty repository on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty repository on `clock`.
    pub fn with_clock(clock: ClockRef) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            clock,
            down: AtomicBool::new(false),
            deletes: AtomicU32::new(0),
        }
    }

    /// While `down`, every call fails with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Last touch of `worker`, if registered.
    pub async fn last_seen(&self, worker: &str) -> Option<DateTime<Utc>> {
        self.rows.read().await.get(worker).copied()
    }

    /// Sorted names of registered workers.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rows.read().await.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Sorted names of workers not touched within `older_than`.
    pub async fn stale(&self, older_than: Duration) -> Vec<String> {
        let now = self.clock.now();
        let mut names: Vec<String> = self
            .rows
            .read()
            .await
            .iter()
            .filter(|(_, seen)| elapsed_at_least(**seen, now, older_than))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort_unstable();
        names
    }

    /// Number of delete calls received (including failed ones).
    pub fn delete_calls(&self) -> u32 {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerRepository for MemoryWorkerRepository {
    async fn touch(&self, worker: &str) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let now = self.clock.now();
        self.rows.write().await.insert(worker.to_string(), now);
        Ok(())
    }

    async fn delete(&self, worker: &str) -> Result<(), StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.rows.write().await.remove(worker);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::Value;

    fn fields(pairs: &[(&str, i64)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    #[tokio::test]
    async fn test_update_merges_and_refreshes_ttl() {
        let clock = ManualClock::default();
        let store = MemoryHealthStore::with_clock(Duration::from_secs(10), Arc::new(clock.clone()));

        store.update("c", fields(&[("a", 1), ("b", 2)])).await.unwrap();
        clock.advance(Duration::from_secs(8));
        store.update("c", fields(&[("b", 3)])).await.unwrap();
        clock.advance(Duration::from_secs(8));

        let found = store.find("c").await.unwrap().unwrap();
        assert_eq!(found["a"], Value::from(1));
        assert_eq!(found["b"], Value::from(3));
    }

    #[tokio::test]
    async fn test_records_expire_after_ttl() {
        let clock = ManualClock::default();
        let store = MemoryHealthStore::with_clock(Duration::from_secs(5), Arc::new(clock.clone()));

        store.update("c", fields(&[("a", 1)])).await.unwrap();
        assert_eq!(store.len().await, 1);
        clock.advance(Duration::from_secs(5));
        assert!(store.find("c").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_forget_and_unavailable() {
        let store = MemoryHealthStore::new(Duration::from_secs(60));
        store.update("c", fields(&[("a", 1)])).await.unwrap();
        store.forget("c").await.unwrap();
        assert!(store.find("c").await.unwrap().is_none());

        store.set_unavailable(true);
        assert!(store.update("c", Fields::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_stale_workers() {
        let clock = ManualClock::default();
        let repo = MemoryWorkerRepository::with_clock(Arc::new(clock.clone()));

        repo.touch("old").await.unwrap();
        clock.advance(Duration::from_secs(30));
        repo.touch("fresh").await.unwrap();

        assert_eq!(repo.stale(Duration::from_secs(20)).await, vec!["old".to_string()]);
        assert_eq!(repo.names().await, vec!["fresh".to_string(), "old".to_string()]);

        repo.delete("old").await.unwrap();
        assert_eq!(repo.names().await, vec!["fresh".to_string()]);
        assert_eq!(repo.delete_calls(), 1);
    }
}
