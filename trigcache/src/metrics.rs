//! Metrics declaration and recording.

use trigcache_core::CacheStatus;

use crate::quota::{Classification, Dimension};

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    // Cache status metrics

    /// Track number of cache hit events.
    pub static ref CACHE_HIT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "trigcache_cache_hit_total",
            "Total number of cache hit events."
        );
        "trigcache_cache_hit_total"
    };
    /// Track number of cache miss events.
    pub static ref CACHE_MISS_COUNTER: &'static str = {
        metrics::describe_counter!(
            "trigcache_cache_miss_total",
            "Total number of cache miss events."
        );
        "trigcache_cache_miss_total"
    };
    /// Track number of requests that asked for fresh data.
    pub static ref CACHE_BYPASS_COUNTER: &'static str = {
        metrics::describe_counter!(
            "trigcache_cache_bypass_total",
            "Total number of cache bypass events."
        );
        "trigcache_cache_bypass_total"
    };
    /// Track cache writes that did not reach the store.
    pub static ref CACHE_WRITE_ERRORS: &'static str = {
        metrics::describe_counter!(
            "trigcache_cache_write_errors_total",
            "Total number of cache writes that failed or were skipped."
        );
        "trigcache_cache_write_errors_total"
    };

    // Quota metrics

    /// Track quota checks by outcome and classification.
    pub static ref QUOTA_CHECKS: &'static str = {
        metrics::describe_counter!(
            "trigcache_quota_checks_total",
            "Total number of quota checks."
        );
        "trigcache_quota_checks_total"
    };
    /// Track quota denials by the dimension that was exhausted.
    pub static ref QUOTA_DENIALS: &'static str = {
        metrics::describe_counter!(
            "trigcache_quota_denials_total",
            "Total number of requests denied by the weekly quota."
        );
        "trigcache_quota_denials_total"
    };
    /// Track quota checks allowed because the store was unreachable.
    pub static ref QUOTA_FAIL_OPEN: &'static str = {
        metrics::describe_counter!(
            "trigcache_quota_fail_open_total",
            "Total number of quota checks allowed without consulting the store."
        );
        "trigcache_quota_fail_open_total"
    };
}

/// Record what the cache did for one request.
///
/// When the `metrics` feature is disabled, this function is a no-op
/// and will be eliminated by the compiler.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_cache_status(resource_type: &str, status: CacheStatus) {
    let counter = match status {
        CacheStatus::Hit => *CACHE_HIT_COUNTER,
        CacheStatus::Miss => *CACHE_MISS_COUNTER,
        CacheStatus::Bypass => *CACHE_BYPASS_COUNTER,
    };
    metrics::counter!(counter, "resource" => resource_type.to_owned()).increment(1);
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_cache_status(_resource_type: &str, _status: CacheStatus) {}

/// Record a cache write that was lost.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_write_error(resource_type: &str) {
    metrics::counter!(*CACHE_WRITE_ERRORS, "resource" => resource_type.to_owned()).increment(1);
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_write_error(_resource_type: &str) {}

/// Record the outcome of a quota check.
///
/// `denied` carries the exhausted dimension, `fail_open` marks checks that
/// were allowed without reaching the store.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_quota_check(classification: Classification, denied: Option<Dimension>, fail_open: bool) {
    let outcome = if denied.is_some() { "denied" } else { "allowed" };
    metrics::counter!(
        *QUOTA_CHECKS,
        "outcome" => outcome,
        "classification" => classification.as_str()
    )
    .increment(1);
    if let Some(dimension) = denied {
        metrics::counter!(*QUOTA_DENIALS, "dimension" => dimension.as_str()).increment(1);
    }
    if fail_open {
        metrics::counter!(*QUOTA_FAIL_OPEN).increment(1);
    }
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_quota_check(
    _classification: Classification,
    _denied: Option<Dimension>,
    _fail_open: bool,
) {
}
