//! Tower middleware for the trigcache response cache and tile quota.
//!
//! [`Cache`] caches the `GET` responses of one route through a
//! [`CachingMiddleware`](trigcache::CachingMiddleware); [`QuotaLayer`]
//! enforces a weekly [`QuotaTracker`](trigcache::QuotaTracker) in front of a
//! tile proxy route. Both work with any Tower-based server.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use trigcache::{EndpointPolicy, ResourceType, Settings};
//! use trigcache_tower::Cache;
//!
//! let settings = Settings::from_path("trigcache.yaml")?;
//! let store = settings.shared_store()?;
//! let cache = settings.cache_store(&store)?;
//!
//! let policy = EndpointPolicy::new(ResourceType::new("trig")?)
//!     .resource_id_param("trig_id")
//!     .ttl(Duration::from_secs(600));
//! let layer = Cache::builder(cache, policy).path("/trigs/{trig_id}").build();
//!
//! let app = axum::Router::new()
//!     .route("/trigs/{trig_id}", axum::routing::get(get_trig).layer(layer));
//! ```
//!
//! # Response Headers
//!
//! Every response resolved through the cache carries:
//!
//! | Header | Value |
//! |--------|-------|
//! | `x-cache-status` | `HIT`, `MISS` or `BYPASS` |
//! | `x-cache-key` | resolved cache key |
//! | `x-cache-ttl` | route TTL in seconds |
//! | `x-cache-age` | entry age in seconds, hits only |
//!
//! Requests sending `Cache-Control: no-cache`/`no-store` or
//! `Pragma: no-cache` bypass the cache: the handler runs and nothing is
//! read or written.
//!
//! # Main Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Cache`] | Tower `Layer` caching one route |
//! | [`QuotaLayer`] | Tower `Layer` enforcing the weekly tile quota |
//! | [`CacheBody`] | Response body of both services |
//! | [`NonCacheable`] | Response extension that prevents storing |
//! | [`ServedFromCache`] | Response extension marking cache hits |

pub mod body;
pub mod extension;
pub mod future;
pub mod layer;
pub mod quota;
pub mod request;
pub mod service;

pub use body::CacheBody;
pub use extension::{NonCacheable, ServedFromCache};
pub use future::CacheServiceFuture;
pub use layer::{Cache, CacheBuilder};
pub use quota::{QuotaLayer, QuotaService, denial_response};
pub use request::{PathTemplate, client_address, wants_fresh};
pub use service::CacheService;
