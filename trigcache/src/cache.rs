//! Namespaced cache operations over the shared store.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};
use trigcache_core::{CacheEntry, CacheKey, KeyCodec, Raw, ResourceType};

use crate::error::PatternError;
use crate::store::SharedStore;

/// Keys deleted per `UNLINK` and scanned per `SCAN` step.
pub const DEFAULT_SCAN_BATCH: usize = 500;

/// TTL of routes that don't set their own.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Returned by the bulk deletes when the store could not be reached.
///
/// Distinct from `0`, which means the store answered and nothing matched.
pub const STORE_UNAVAILABLE: i64 = -1;

/// Store statistics as reported to the administrative surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Keys inside the current namespace.
    pub key_count: u64,
    /// Keys in the whole store, all namespaces included.
    pub total_keys: u64,
    /// Memory used by the store in bytes.
    pub memory_used: Option<u64>,
    /// Memory used, as formatted by the store.
    pub memory_used_human: Option<String>,
    /// Successful lookups since the store started.
    pub hits: u64,
    /// Failed lookups since the store started.
    pub misses: u64,
    /// `hits / (hits + misses)`.
    pub hit_rate: Option<f64>,
    /// Clients connected to the store.
    pub connected_clients: Option<u64>,
    /// Store uptime in seconds.
    pub uptime: Option<u64>,
}

/// Cache client for one application namespace.
///
/// Every method absorbs store failures: reads come back empty, writes
/// report `false`, bulk deletes report [`STORE_UNAVAILABLE`]. Nothing here
/// returns a store error to the caller.
#[derive(Debug, Clone)]
pub struct CacheStore {
    store: SharedStore,
    codec: KeyCodec,
    scan_batch: usize,
    default_ttl: Duration,
}

impl CacheStore {
    /// Creates a cache over `store` writing keys built by `codec`.
    pub fn new(store: SharedStore, codec: KeyCodec) -> Self {
        Self {
            store,
            codec,
            scan_batch: DEFAULT_SCAN_BATCH,
            default_ttl: DEFAULT_TTL,
        }
    }

    /// Sets the TTL used by routes that don't configure one.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// TTL used by routes that don't configure one.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Sets how many keys each scan step and each delete command touch.
    pub fn with_scan_batch(mut self, batch: usize) -> Self {
        self.scan_batch = batch.max(1);
        self
    }

    /// The codec keys are built with.
    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    /// The shared store handle.
    pub fn shared(&self) -> &SharedStore {
        &self.store
    }

    /// Reads `key`, returning the value and the entry age.
    ///
    /// Entries that no longer decode as `T` are treated as misses.
    pub async fn get<T>(&self, key: &CacheKey) -> Option<(T, Duration)>
    where
        T: DeserializeOwned,
    {
        let store = self.store.available().await?;
        let stored = match store.read(key.as_str()).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(error) => {
                warn!(key = %key, %error, "cache read failed");
                return None;
            }
        };
        match serde_json::from_slice::<CacheEntry<T>>(&stored.data) {
            Ok(entry) => {
                let age = entry.age(stored.remaining_ttl);
                trace!(key = %key, ?age, "cache entry read");
                Some((entry.into_value(), age))
            }
            Err(error) => {
                warn!(key = %key, %error, "cached entry could not be decoded");
                None
            }
        }
    }

    /// Writes `value` under `key` for `ttl`.
    ///
    /// Returns `false` if the value could not be serialized or the store
    /// rejected the write; the failure is logged.
    pub async fn set<T>(&self, key: &CacheKey, value: &T, ttl: Duration) -> bool
    where
        T: Serialize + ?Sized,
    {
        let Some(store) = self.store.available().await else {
            return false;
        };
        let data = match serde_json::to_vec(&CacheEntry::new(value, ttl)) {
            Ok(data) => Raw::from(data),
            Err(error) => {
                warn!(key = %key, %error, "value could not be serialized for the cache");
                return false;
            }
        };
        match store.write(key.as_str(), data, ttl).await {
            Ok(()) => {
                trace!(key = %key, ?ttl, "cache entry written");
                true
            }
            Err(error) => {
                warn!(key = %key, %error, "cache write failed");
                false
            }
        }
    }

    /// Deletes `key`. Returns whether anything was removed.
    pub async fn delete(&self, key: &CacheKey) -> bool {
        let Some(store) = self.store.available().await else {
            return false;
        };
        match store.remove(key.as_str()).await {
            Ok(status) => status.is_deleted(),
            Err(error) => {
                warn!(key = %key, %error, "cache delete failed");
                false
            }
        }
    }

    /// Remaining lifetime of `key`, if it exists and expires.
    pub async fn ttl(&self, key: &CacheKey) -> Option<Duration> {
        let store = self.store.available().await?;
        match store.remaining_ttl(key.as_str()).await {
            Ok(remaining) => remaining,
            Err(error) => {
                warn!(key = %key, %error, "cache ttl lookup failed");
                None
            }
        }
    }

    /// Deletes every key matching the glob `pattern` inside the current
    /// namespace.
    ///
    /// The pattern is always prefixed with `app:env:`, so `other-app:*`
    /// matches `app:env:other-app:*` and can never reach another
    /// application's keys. Returns the number of keys removed, or
    /// [`STORE_UNAVAILABLE`].
    pub async fn delete_pattern(&self, pattern: &str) -> Result<i64, PatternError> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }
        if pattern.chars().all(|c| matches!(c, '*' | '?')) {
            return Err(PatternError::MatchesEverything(pattern.to_owned()));
        }
        check_glob(pattern)?;
        let scoped = self.codec.namespace().scoped(pattern);
        Ok(self.remove_matching(&scoped).await)
    }

    /// Deletes every cached entry of `resource_type`, optionally only those
    /// of one resource id.
    ///
    /// Write handlers call this after mutating a resource.
    pub async fn invalidate_resource(
        &self,
        resource_type: &ResourceType,
        resource_id: Option<&str>,
    ) -> i64 {
        let pattern = self.codec.resource_pattern(resource_type, resource_id);
        self.remove_matching(&pattern).await
    }

    /// Deletes every key of the current namespace.
    pub async fn flush_namespace(&self) -> bool {
        self.purge_namespace().await != STORE_UNAVAILABLE
    }

    /// Like [`flush_namespace`](Self::flush_namespace), reporting the number
    /// of keys removed or [`STORE_UNAVAILABLE`].
    pub async fn purge_namespace(&self) -> i64 {
        let pattern = self.codec.namespace().wildcard();
        self.remove_matching(&pattern).await
    }

    /// Store statistics, `None` if the store is unreachable.
    pub async fn stats(&self) -> Option<CacheStats> {
        let store = self.store.available().await?;
        let info = match store.info().await {
            Ok(info) => info,
            Err(error) => {
                warn!(%error, "cache stats unavailable");
                return None;
            }
        };
        let key_count = match store
            .count_matching(&self.codec.namespace().wildcard(), self.scan_batch)
            .await
        {
            Ok(count) => count,
            Err(error) => {
                warn!(%error, "namespace key count unavailable");
                return None;
            }
        };
        Some(CacheStats {
            key_count,
            total_keys: info.total_keys,
            hit_rate: info.hit_rate(),
            memory_used: info.memory_used,
            memory_used_human: info.memory_used_human,
            hits: info.hits,
            misses: info.misses,
            connected_clients: info.connected_clients,
            uptime: info.uptime.map(|uptime| uptime.as_secs()),
        })
    }

    async fn remove_matching(&self, pattern: &str) -> i64 {
        let Some(store) = self.store.available().await else {
            return STORE_UNAVAILABLE;
        };
        match store.remove_matching(pattern, self.scan_batch).await {
            Ok(removed) => {
                debug!(pattern, removed, "cache keys invalidated");
                i64::try_from(removed).unwrap_or(i64::MAX)
            }
            Err(error) if error.is_unavailable() => {
                warn!(pattern, %error, "cache invalidation failed, store unreachable");
                STORE_UNAVAILABLE
            }
            Err(error) => {
                warn!(pattern, %error, "cache invalidation failed");
                0
            }
        }
    }
}

/// Rejects globs the store can't interpret: a trailing `\` and unterminated
/// or empty `[...]` classes.
fn check_glob(pattern: &str) -> Result<(), PatternError> {
    let malformed = |reason| PatternError::Malformed {
        pattern: pattern.to_owned(),
        reason,
    };
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                chars.next().ok_or_else(|| malformed("trailing escape"))?;
            }
            '[' => {
                chars.next_if_eq(&'^');
                let mut members = 0;
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(_) => members += 1,
                        None => return Err(malformed("unterminated character class")),
                    }
                }
                if members == 0 {
                    return Err(malformed("empty character class"));
                }
            }
            _ => {}
        }
    }
    Ok(())
}
