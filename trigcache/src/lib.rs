#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Namespaced cache client.
///
/// [`CacheStore`] turns store failures into the documented sentinels and
/// keeps bulk deletes inside the current namespace.
pub mod cache;

/// YAML settings and construction of the components from them.
pub mod config;

/// Error types for configuration and bulk deletes.
pub mod error;

/// Metrics collection.
///
/// When the `metrics` feature is enabled, this module records counters for
/// cache hits, misses and bypasses, lost writes and quota decisions.
pub mod metrics;

/// Handler wrapping.
pub mod middleware;

pub mod quota;

/// Connect-once store handle.
pub mod store;

pub use cache::{CacheStats, CacheStore, STORE_UNAVAILABLE};
pub use config::{Environment, Settings};
pub use error::{ConfigError, PatternError};
pub use middleware::{CallArgs, Cached, CachedHandler, CachingMiddleware, EndpointPolicy};
pub use quota::{QuotaDecision, QuotaDenial, QuotaTracker, UsageLimits, UsageReport, UsageRequest};
pub use store::{ConnectionState, SharedStore};

pub use trigcache_backend::{Store, StoreError};
pub use trigcache_core::{
    CacheAnnotation, CacheKey, CachePolicy, CacheStatus, KeyCodec, Namespace, Params,
    ResourceType,
};
