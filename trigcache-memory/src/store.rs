//! In-memory store implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use tokio::time::Instant;
use tracing::trace;
use trigcache_backend::{DeleteStatus, Store, StoreError, StoreInfo, StoreResult, StoredValue};
use trigcache_core::Raw;

use crate::glob;

#[derive(Debug, Clone)]
struct Slot {
    data: Raw,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }
}

/// Operation counters, for asserting what a caller did to the store.
#[derive(Debug, Default)]
pub struct StoreCounters {
    reads: AtomicU64,
    writes: AtomicU64,
    removes: AtomicU64,
    increments: AtomicU64,
}

impl StoreCounters {
    /// Number of `read` calls.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `write` calls.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of `remove` and `remove_matching` calls.
    pub fn removes(&self) -> u64 {
        self.removes.load(Ordering::SeqCst)
    }

    /// Number of `increment` calls.
    pub fn increments(&self) -> u64 {
        self.increments.load(Ordering::SeqCst)
    }
}

/// Store living inside the current process.
///
/// Behaves like the Redis store as far as trigcache is concerned: values
/// expire on their own, remaining lifetime is reported on read, pattern
/// deletes understand Redis globs and counters are plain integers. Expiry
/// follows the tokio clock, so tests can pause and advance time.
///
/// # Caveats
///
/// - Data is **not shared** across processes; use Redis for that.
/// - Expired entries are purged lazily on access.
///
/// # Examples
///
/// ```
/// use trigcache_memory::MemoryStore;
///
/// let store = MemoryStore::new();
/// // Simulate an outage:
/// store.set_available(false);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStore {
    slots: Arc<DashMap<String, Slot>>,
    available: Arc<AtomicBool>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    counters: Arc<StoreCounters>,
    name: String,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty, reachable store.
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            available: Arc::new(AtomicBool::new(true)),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            counters: Arc::new(StoreCounters::default()),
            name: "memory".to_owned(),
        }
    }

    /// Creates a store that refuses every operation, as if the server were
    /// down.
    pub fn unreachable() -> Self {
        let store = Self::new();
        store.set_available(false);
        store
    }

    /// Sets a custom name used in logs and metric labels.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Toggles simulated reachability. Shared by every clone.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Operation counters.
    pub fn counters(&self) -> &StoreCounters {
        &self.counters
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.iter().filter(|s| !s.is_expired(now)).count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is present and not expired.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.slots.get(key).is_some_and(|s| !s.is_expired(now))
    }

    /// Every live key, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .slots
            .iter()
            .filter(|s| !s.is_expired(now))
            .map(|s| s.key().clone())
            .collect();
        keys.sort();
        keys
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Connection(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "memory store marked unavailable",
            ))))
        }
    }

    fn live(&self, key: &str) -> Option<Slot> {
        let now = Instant::now();
        let slot = self.slots.get(key).map(|s| s.value().clone())?;
        if slot.is_expired(now) {
            self.slots.remove_if(key, |_, s| s.is_expired(now));
            None
        } else {
            Some(slot)
        }
    }

    fn matching(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let re = glob::compile(pattern).map_err(|e| StoreError::Internal(Box::new(e)))?;
        let now = Instant::now();
        Ok(self
            .slots
            .iter()
            .filter(|s| !s.is_expired(now) && re.is_match(s.key()))
            .map(|s| s.key().clone())
            .collect())
    }
}

fn parse_counter(data: &Raw) -> StoreResult<u64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| StoreError::internal("value is not an integer"))
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.ensure_available()
    }

    async fn read(&self, key: &str) -> StoreResult<Option<StoredValue>> {
        self.ensure_available()?;
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        match self.live(key) {
            Some(slot) => {
                self.hits.fetch_add(1, Ordering::SeqCst);
                Ok(Some(StoredValue {
                    remaining_ttl: slot.remaining(now),
                    data: slot.data,
                }))
            }
            None => {
                self.misses.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        }
    }

    async fn write(&self, key: &str, data: Raw, ttl: Duration) -> StoreResult<()> {
        self.ensure_available()?;
        self.counters.writes.fetch_add(1, Ordering::SeqCst);
        trace!(key, ?ttl, "memory write");
        self.slots.insert(
            key.to_owned(),
            Slot {
                data,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<DeleteStatus> {
        self.ensure_available()?;
        self.counters.removes.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        match self.slots.remove(key) {
            Some((_, slot)) if !slot.is_expired(now) => Ok(DeleteStatus::Deleted(1)),
            _ => Ok(DeleteStatus::Missing),
        }
    }

    async fn remaining_ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.ensure_available()?;
        let now = Instant::now();
        Ok(self.live(key).and_then(|slot| slot.remaining(now)))
    }

    async fn remove_matching(&self, pattern: &str, batch: usize) -> StoreResult<u64> {
        self.ensure_available()?;
        self.counters.removes.fetch_add(1, Ordering::SeqCst);
        let keys = self.matching(pattern)?;
        let mut removed = 0;
        for chunk in keys.chunks(batch.max(1)) {
            removed += chunk
                .iter()
                .filter(|key| self.slots.remove(key.as_str()).is_some())
                .count() as u64;
            trace!(pattern, removed, "memory scan step");
        }
        Ok(removed)
    }

    async fn count_matching(&self, pattern: &str, _batch: usize) -> StoreResult<u64> {
        self.ensure_available()?;
        Ok(self.matching(pattern)?.len() as u64)
    }

    async fn read_counters(&self, keys: &[String]) -> StoreResult<Vec<u64>> {
        self.ensure_available()?;
        keys.iter()
            .map(|key| match self.live(key) {
                Some(slot) => parse_counter(&slot.data),
                None => Ok(0),
            })
            .collect()
    }

    async fn increment(&self, keys: &[String], expire: Duration) -> StoreResult<Vec<u64>> {
        self.ensure_available()?;
        self.counters.increments.fetch_add(1, Ordering::SeqCst);
        // All or nothing: fail before touching any key if one isn't a counter.
        for key in keys {
            if let Some(slot) = self.live(key) {
                parse_counter(&slot.data)?;
            }
        }
        let now = Instant::now();
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let value = match self.slots.entry(key.clone()) {
                MapEntry::Occupied(mut occupied) => {
                    let current = if occupied.get().is_expired(now) {
                        0
                    } else {
                        parse_counter(&occupied.get().data).unwrap_or(0)
                    };
                    let next = current + 1;
                    occupied.insert(Slot {
                        data: Raw::from(next.to_string()),
                        expires_at: Some(now + expire),
                    });
                    next
                }
                MapEntry::Vacant(vacant) => {
                    vacant.insert(Slot {
                        data: Raw::from_static(b"1"),
                        expires_at: Some(now + expire),
                    });
                    1
                }
            };
            values.push(value);
        }
        Ok(values)
    }

    async fn info(&self) -> StoreResult<StoreInfo> {
        self.ensure_available()?;
        let memory: usize = self
            .slots
            .iter()
            .map(|s| s.key().len() + s.data.len())
            .sum();
        Ok(StoreInfo {
            total_keys: self.len() as u64,
            memory_used: Some(memory as u64),
            memory_used_human: Some(format!("{memory}B")),
            hits: self.hits.load(Ordering::SeqCst),
            misses: self.misses.load(Ordering::SeqCst),
            connected_clients: Some(1),
            uptime: None,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_write_read_and_expire() {
        let store = MemoryStore::new();
        store
            .write("k", Raw::from_static(b"v"), Duration::from_secs(1))
            .await
            .unwrap();

        let read = store.read("k").await.unwrap().unwrap();
        assert_eq!(read.data, Raw::from_static(b"v"));
        assert_eq!(read.remaining_ttl, Some(Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.read("k").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_remove_matching_honours_glob() {
        let store = MemoryStore::new();
        for key in ["a:x:1", "a:x:2", "a:y:1", "b:x:1"] {
            store
                .write(key, Raw::from_static(b"1"), Duration::from_secs(60))
                .await
                .unwrap();
        }
        assert_eq!(store.count_matching("a:x:*", 10).await.unwrap(), 2);
        assert_eq!(store.remove_matching("a:*", 1).await.unwrap(), 3);
        assert_eq!(store.keys(), vec!["b:x:1".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counters_increment_and_expire() {
        let store = MemoryStore::new();
        let keys = vec!["c:1".to_owned(), "c:2".to_owned()];
        assert_eq!(store.read_counters(&keys).await.unwrap(), vec![0, 0]);

        store.increment(&keys, Duration::from_secs(10)).await.unwrap();
        let values = store
            .increment(&keys[..1], Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(values, vec![2]);
        assert_eq!(store.read_counters(&keys).await.unwrap(), vec![2, 1]);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.read_counters(&keys).await.unwrap(), vec![0, 0]);
    }

    #[tokio::test]
    async fn test_failed_increment_changes_nothing() {
        let store = MemoryStore::new();
        store
            .write("c:2", Raw::from_static(b"not a number"), Duration::from_secs(60))
            .await
            .unwrap();
        let keys = vec!["c:1".to_owned(), "c:2".to_owned(), "c:3".to_owned()];

        let error = store.increment(&keys, Duration::from_secs(60)).await.unwrap_err();
        assert!(!error.is_unavailable());
        assert!(!store.contains_key("c:1"));
        assert!(!store.contains_key("c:3"));
        let stored = store.read("c:2").await.unwrap().unwrap();
        assert_eq!(stored.data, Raw::from_static(b"not a number"));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryStore::unreachable();
        assert!(store.ping().await.unwrap_err().is_unavailable());
        assert!(store.read("k").await.unwrap_err().is_unavailable());

        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }
}
