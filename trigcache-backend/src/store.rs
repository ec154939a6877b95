use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use trigcache_core::Raw;

use crate::{DeleteStatus, StoreError, StoreInfo, StoredValue};

/// Result alias for [`Store`] operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Primitive operations of a shared key-value store.
///
/// Keys passed here are fully qualified: namespacing is the caller's job and
/// a `Store` never adds or strips prefixes. Every method is a single network
/// round-trip (or a small pipeline) and implementations bound it with their
/// own timeout.
#[async_trait]
pub trait Store: Send + Sync {
    /// Checks that the store is reachable.
    async fn ping(&self) -> StoreResult<()>;

    /// Reads a value and its remaining lifetime.
    ///
    /// `remaining_ttl` is `None` when the key has no expiry.
    async fn read(&self, key: &str) -> StoreResult<Option<StoredValue>>;

    /// Writes `data` under `key`, replacing any previous value, expiring
    /// after `ttl`.
    async fn write(&self, key: &str, data: Raw, ttl: Duration) -> StoreResult<()>;

    /// Deletes one key.
    async fn remove(&self, key: &str) -> StoreResult<DeleteStatus>;

    /// Remaining lifetime of `key`, `None` if the key is missing or has no
    /// expiry.
    async fn remaining_ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Deletes every key matching the glob `pattern`.
    ///
    /// Implementations walk the key space incrementally and delete at most
    /// `batch` keys per command so that a large invalidation never holds the
    /// store for its whole duration. Returns the number of keys removed.
    async fn remove_matching(&self, pattern: &str, batch: usize) -> StoreResult<u64>;

    /// Counts keys matching the glob `pattern`, scanning incrementally.
    async fn count_matching(&self, pattern: &str, batch: usize) -> StoreResult<u64>;

    /// Reads integer counters. Missing keys read as zero.
    async fn read_counters(&self, keys: &[String]) -> StoreResult<Vec<u64>>;

    /// Atomically increments each counter by one and (re)sets its expiry.
    ///
    /// Missing counters start at zero. Returns the new values in key order.
    async fn increment(&self, keys: &[String], expire: Duration) -> StoreResult<Vec<u64>>;

    /// Server-wide statistics.
    async fn info(&self) -> StoreResult<StoreInfo>;

    /// Returns the name of this store for logs and metric labels.
    fn name(&self) -> &str {
        "store"
    }
}

#[async_trait]
impl Store for Box<dyn Store> {
    async fn ping(&self) -> StoreResult<()> {
        (**self).ping().await
    }

    async fn read(&self, key: &str) -> StoreResult<Option<StoredValue>> {
        (**self).read(key).await
    }

    async fn write(&self, key: &str, data: Raw, ttl: Duration) -> StoreResult<()> {
        (**self).write(key, data, ttl).await
    }

    async fn remove(&self, key: &str) -> StoreResult<DeleteStatus> {
        (**self).remove(key).await
    }

    async fn remaining_ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        (**self).remaining_ttl(key).await
    }

    async fn remove_matching(&self, pattern: &str, batch: usize) -> StoreResult<u64> {
        (**self).remove_matching(pattern, batch).await
    }

    async fn count_matching(&self, pattern: &str, batch: usize) -> StoreResult<u64> {
        (**self).count_matching(pattern, batch).await
    }

    async fn read_counters(&self, keys: &[String]) -> StoreResult<Vec<u64>> {
        (**self).read_counters(keys).await
    }

    async fn increment(&self, keys: &[String], expire: Duration) -> StoreResult<Vec<u64>> {
        (**self).increment(keys, expire).await
    }

    async fn info(&self) -> StoreResult<StoreInfo> {
        (**self).info().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl Store for Arc<dyn Store> {
    async fn ping(&self) -> StoreResult<()> {
        (**self).ping().await
    }

    async fn read(&self, key: &str) -> StoreResult<Option<StoredValue>> {
        (**self).read(key).await
    }

    async fn write(&self, key: &str, data: Raw, ttl: Duration) -> StoreResult<()> {
        (**self).write(key, data, ttl).await
    }

    async fn remove(&self, key: &str) -> StoreResult<DeleteStatus> {
        (**self).remove(key).await
    }

    async fn remaining_ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        (**self).remaining_ttl(key).await
    }

    async fn remove_matching(&self, pattern: &str, batch: usize) -> StoreResult<u64> {
        (**self).remove_matching(pattern, batch).await
    }

    async fn count_matching(&self, pattern: &str, batch: usize) -> StoreResult<u64> {
        (**self).count_matching(pattern, batch).await
    }

    async fn read_counters(&self, keys: &[String]) -> StoreResult<Vec<u64>> {
        (**self).read_counters(keys).await
    }

    async fn increment(&self, keys: &[String], expire: Duration) -> StoreResult<Vec<u64>> {
        (**self).increment(keys, expire).await
    }

    async fn info(&self) -> StoreResult<StoreInfo> {
        (**self).info().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
