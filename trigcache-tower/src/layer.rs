use std::sync::Arc;

use tower::Layer;
use trigcache::{CacheStore, CachingMiddleware, EndpointPolicy};

use crate::request::PathTemplate;
use crate::service::CacheService;

/// Tower layer caching the `GET` responses of one route.
#[derive(Debug, Clone)]
pub struct Cache {
    middleware: CachingMiddleware,
    template: Option<Arc<PathTemplate>>,
}

impl Cache {
    /// Layer caching through `middleware`.
    ///
    /// Without a path template only query parameters reach the key.
    pub fn new(middleware: CachingMiddleware) -> Self {
        Self {
            middleware,
            template: None,
        }
    }

    /// Starts a builder from a cache client and route policy.
    pub fn builder(cache: CacheStore, policy: EndpointPolicy) -> CacheBuilder {
        CacheBuilder {
            middleware: CachingMiddleware::new(cache, policy),
            template: None,
        }
    }

    /// The middleware the layer caches through.
    pub fn middleware(&self) -> &CachingMiddleware {
        &self.middleware
    }
}

impl<S> Layer<S> for Cache {
    type Service = CacheService<S>;

    fn layer(&self, upstream: S) -> Self::Service {
        CacheService::new(upstream, self.middleware.clone(), self.template.clone())
    }
}

/// Builder for [`Cache`].
pub struct CacheBuilder {
    middleware: CachingMiddleware,
    template: Option<Arc<PathTemplate>>,
}

impl CacheBuilder {
    /// Route path template, e.g. `/trigs/{trig_id}/logs`.
    ///
    /// Named segments become arguments; requests whose path does not match
    /// pass through uncached.
    pub fn path(self, template: &str) -> Self {
        CacheBuilder {
            template: Some(Arc::new(PathTemplate::new(template))),
            ..self
        }
    }

    pub fn build(self) -> Cache {
        Cache {
            middleware: self.middleware,
            template: self.template,
        }
    }
}
