//! Cache status and the out-of-band annotations attached to every response.

use std::fmt;
use std::time::Duration;

use crate::key::CacheKey;

/// Header carrying [`CacheStatus`].
pub const CACHE_STATUS_HEADER: &str = "x-cache-status";
/// Header carrying the resolved cache key.
pub const CACHE_KEY_HEADER: &str = "x-cache-key";
/// Header carrying the configured TTL in seconds.
pub const CACHE_TTL_HEADER: &str = "x-cache-ttl";
/// Header carrying the entry age in seconds (hits only).
pub const CACHE_AGE_HEADER: &str = "x-cache-age";

/// Whether a response was served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum CacheStatus {
    /// Served from a stored entry; the handler did not run.
    Hit,
    /// No usable entry; the handler ran.
    #[default]
    Miss,
    /// The caller asked for fresh data; the store was neither read nor written.
    Bypass,
}

impl CacheStatus {
    /// Lowercase form used for metric labels and log fields.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
            CacheStatus::Bypass => "bypass",
        }
    }

    /// Uppercase form used in the status header.
    #[inline]
    pub const fn header_value(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header_value())
    }
}

/// Cache metadata reported alongside a response.
///
/// Lets clients and operators see what the cache did without looking inside
/// the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheAnnotation {
    /// What the cache did.
    pub status: CacheStatus,
    /// Key the request resolved to.
    pub key: CacheKey,
    /// Configured TTL for the route.
    pub ttl: Duration,
    /// Entry age, present on hits.
    pub age: Option<Duration>,
}

impl CacheAnnotation {
    /// Annotation for a response served from the store.
    pub fn hit(key: CacheKey, ttl: Duration, age: Duration) -> Self {
        Self {
            status: CacheStatus::Hit,
            key,
            ttl,
            age: Some(age),
        }
    }

    /// Annotation for a response produced by the handler.
    pub fn miss(key: CacheKey, ttl: Duration) -> Self {
        Self {
            status: CacheStatus::Miss,
            key,
            ttl,
            age: None,
        }
    }

    /// Annotation for a response produced by the handler on request of the
    /// caller.
    pub fn bypass(key: CacheKey, ttl: Duration) -> Self {
        Self {
            status: CacheStatus::Bypass,
            key,
            ttl,
            age: None,
        }
    }

    /// Header name/value pairs describing this annotation.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (CACHE_STATUS_HEADER, self.status.header_value().to_owned()),
            (CACHE_KEY_HEADER, self.key.to_string()),
            (CACHE_TTL_HEADER, self.ttl.as_secs().to_string()),
        ];
        if let Some(age) = self.age {
            headers.push((CACHE_AGE_HEADER, age.as_secs().to_string()));
        }
        headers
    }
}
