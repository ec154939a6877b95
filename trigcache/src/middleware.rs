//! Response caching around handlers.
//!
//! A route is cached by wrapping its handler at registration time:
//!
//! ```ignore
//! let policy = EndpointPolicy::new(ResourceType::new("trig")?)
//!     .resource_id_param("trig_id")
//!     .ttl(Duration::from_secs(600));
//! let get_trig = CachingMiddleware::new(cache.clone(), policy).wrap(get_trig);
//!
//! let args = CallArgs::new().with("trig_id", 42).with("db", "pool-1");
//! let Cached { body, annotation } = get_trig.call(args).await?;
//! ```
//!
//! The handler only sees its arguments and returns a [`CachePolicy`]; it
//! never knows whether the result came from the store.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use smol_str::SmolStr;
use tracing::debug;
use trigcache_core::{
    CacheAnnotation, CacheKey, CachePolicy, CacheStatus, KeyCodec, KeyError, Params, ResourceType,
};

use crate::cache::CacheStore;
use crate::metrics;

/// Argument names that are request plumbing, never part of a key.
pub const DEFAULT_EXCLUDED_ARGS: &[&str] = &["request", "db", "current_user"];

/// Named arguments of one handler call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    values: BTreeMap<String, Value>,
    bypass: bool,
}

impl CallArgs {
    /// No arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an argument.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds or replaces an argument.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Argument `name`, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Iterates arguments in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Marks the call as asking for fresh data.
    pub fn bypass(mut self, bypass: bool) -> Self {
        self.bypass = bypass;
        self
    }

    /// Whether the caller asked for fresh data.
    pub fn is_bypass(&self) -> bool {
        self.bypass
    }
}

impl<K, V> FromIterator<(K, V)> for CallArgs
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            bypass: false,
        }
    }
}

/// How one route maps its arguments onto a cache key.
#[derive(Debug, Clone)]
pub struct EndpointPolicy {
    resource_type: ResourceType,
    resource_id_param: Option<SmolStr>,
    subresource: Option<SmolStr>,
    include_params: bool,
    excluded: Vec<SmolStr>,
    ttl: Option<Duration>,
    version: Option<SmolStr>,
}

impl EndpointPolicy {
    /// Policy keyed by resource type and all non-plumbing arguments.
    pub fn new(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            resource_id_param: None,
            subresource: None,
            include_params: true,
            excluded: DEFAULT_EXCLUDED_ARGS.iter().map(|s| SmolStr::new(s)).collect(),
            ttl: None,
            version: None,
        }
    }

    /// Takes the resource id segment from argument `name`.
    pub fn resource_id_param(mut self, name: impl AsRef<str>) -> Self {
        self.resource_id_param = Some(SmolStr::new(name));
        self
    }

    /// Adds a fixed sub-resource segment, e.g. `logs`.
    pub fn subresource(mut self, subresource: impl AsRef<str>) -> Self {
        self.subresource = Some(SmolStr::new(subresource));
        self
    }

    /// Whether the remaining arguments are hashed into the key.
    pub fn include_params(mut self, include: bool) -> Self {
        self.include_params = include;
        self
    }

    /// Excludes one more argument from the key.
    pub fn exclude(mut self, name: impl AsRef<str>) -> Self {
        self.excluded.push(SmolStr::new(name));
        self
    }

    /// Route TTL. Without one the cache's default applies.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Overrides the key version tag for this route.
    pub fn version(mut self, version: impl AsRef<str>) -> Result<Self, KeyError> {
        self.version = Some(KeyCodec::validate_version(version.as_ref())?);
        Ok(self)
    }

    /// The route's resource type.
    pub fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    /// Resolves the key for `args`.
    pub fn key(&self, codec: &KeyCodec, args: &CallArgs) -> CacheKey {
        let id_param = self.resource_id_param.as_deref();
        let resource_id = id_param.and_then(|name| args.get(name)).map(render_id);

        let params: Params = if self.include_params {
            args.iter()
                .filter(|(name, _)| Some(*name) != id_param && !self.is_excluded(name))
                .map(|(name, value)| (name.to_owned(), value.clone()))
                .collect()
        } else {
            Params::new()
        };

        let mut builder = codec
            .key(&self.resource_type)
            .maybe_id(resource_id)
            .params(&params);
        if let Some(subresource) = &self.subresource {
            builder = builder.subresource(subresource);
        }
        if let Some(version) = &self.version {
            builder = builder.version(version);
        }
        builder.build()
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.excluded.iter().any(|excluded| excluded == name)
    }
}

fn render_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A handler result together with what the cache did for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T, N> {
    /// The result: from the store on a hit, from the handler otherwise.
    pub body: CachePolicy<T, N>,
    /// Status, key, TTL and age for response headers.
    pub annotation: CacheAnnotation,
}

/// Caches the results of one route.
///
/// On a hit the handler is not called. On a miss the handler runs and a
/// [`CachePolicy::Cacheable`] result is written back; a failed write is
/// logged and the result is still returned. On a bypass the handler runs and
/// nothing is read or written.
#[derive(Debug, Clone)]
pub struct CachingMiddleware {
    cache: CacheStore,
    policy: Arc<EndpointPolicy>,
}

impl CachingMiddleware {
    /// Creates middleware for the route described by `policy`.
    pub fn new(cache: CacheStore, policy: EndpointPolicy) -> Self {
        Self {
            cache,
            policy: Arc::new(policy),
        }
    }

    /// The route policy.
    pub fn policy(&self) -> &EndpointPolicy {
        &self.policy
    }

    /// The cache client.
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// TTL entries of this route are written with.
    pub fn ttl(&self) -> Duration {
        self.policy.ttl.unwrap_or_else(|| self.cache.default_ttl())
    }

    /// Key `args` resolve to.
    pub fn key_for(&self, args: &CallArgs) -> CacheKey {
        self.policy.key(self.cache.codec(), args)
    }

    /// Wraps `handler`.
    pub fn wrap<H>(self, handler: H) -> CachedHandler<H> {
        CachedHandler {
            middleware: self,
            handler,
        }
    }

    /// Runs `handler` through the cache once.
    ///
    /// Handler errors are returned as they are and nothing is cached.
    pub async fn call<T, N, E, F, Fut>(&self, args: CallArgs, handler: F) -> Result<Cached<T, N>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(CallArgs) -> Fut,
        Fut: Future<Output = Result<CachePolicy<T, N>, E>>,
    {
        let key = self.key_for(&args);
        let ttl = self.ttl();
        let resource_type = self.policy.resource_type.as_str();

        if args.is_bypass() {
            debug!(key = %key, "cache bypass");
            metrics::record_cache_status(resource_type, CacheStatus::Bypass);
            let body = handler(args).await?;
            return Ok(Cached {
                body,
                annotation: CacheAnnotation::bypass(key, ttl),
            });
        }

        if let Some((value, age)) = self.cache.get::<T>(&key).await {
            debug!(key = %key, age = age.as_secs(), "cache hit");
            metrics::record_cache_status(resource_type, CacheStatus::Hit);
            return Ok(Cached {
                body: CachePolicy::Cacheable(value),
                annotation: CacheAnnotation::hit(key, ttl, age),
            });
        }

        debug!(key = %key, "cache miss");
        metrics::record_cache_status(resource_type, CacheStatus::Miss);
        let body = handler(args).await?;
        match &body {
            CachePolicy::Cacheable(value) => {
                if !self.cache.set(&key, value, ttl).await {
                    metrics::record_write_error(resource_type);
                }
            }
            CachePolicy::NonCacheable(_) => {
                debug!(key = %key, "result is not cacheable, returned as is");
            }
        }
        Ok(Cached {
            body,
            annotation: CacheAnnotation::miss(key, ttl),
        })
    }
}

/// A handler wrapped by [`CachingMiddleware::wrap`].
#[derive(Debug, Clone)]
pub struct CachedHandler<H> {
    middleware: CachingMiddleware,
    handler: H,
}

impl<H> CachedHandler<H> {
    /// The middleware around the handler.
    pub fn middleware(&self) -> &CachingMiddleware {
        &self.middleware
    }

    /// Calls the handler through the cache.
    pub async fn call<T, N, E, Fut>(&self, args: CallArgs) -> Result<Cached<T, N>, E>
    where
        H: Fn(CallArgs) -> Fut,
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = Result<CachePolicy<T, N>, E>>,
    {
        self.middleware.call(args, &self.handler).await
    }
}
