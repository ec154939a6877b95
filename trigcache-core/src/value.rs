//! Stored entry envelope.
//!
//! Every cached value is written as a [`CacheEntry`]: the handler result plus
//! the TTL it was written with and the write timestamp. The store keeps its
//! own countdown of the remaining lifetime; the age of an entry is derived
//! from that countdown rather than from the wall clock:
//!
//! ```
//! use std::time::Duration;
//! use trigcache_core::CacheEntry;
//!
//! let entry = CacheEntry::new(serde_json::json!({"n": 1}), Duration::from_secs(60));
//! // The store reports 45 seconds left.
//! assert_eq!(entry.age(Some(Duration::from_secs(45))), Duration::from_secs(15));
//! ```

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A cached value with the metadata it was written with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// The handler result.
    pub value: T,
    /// Lifetime in seconds configured at write time.
    pub ttl: u64,
    /// Write time as Unix epoch seconds.
    pub cached_at: i64,
}

impl<T> CacheEntry<T> {
    /// Wraps `value` with the current time and `ttl`.
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            ttl: ttl.as_secs(),
            cached_at: Utc::now().timestamp(),
        }
    }

    /// Configured lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    /// Age of the entry given the store's remaining lifetime for its key.
    ///
    /// `original_ttl - remaining_ttl`. Only when the store can't report a
    /// remaining lifetime does this fall back to `now - cached_at`.
    pub fn age(&self, remaining: Option<Duration>) -> Duration {
        match remaining {
            Some(remaining) => Duration::from_secs(self.ttl.saturating_sub(remaining.as_secs())),
            None => {
                let elapsed = Utc::now().timestamp().saturating_sub(self.cached_at);
                Duration::from_secs(elapsed.max(0) as u64)
            }
        }
    }

    /// Consumes the entry and returns the value.
    pub fn into_value(self) -> T {
        self.value
    }
}
