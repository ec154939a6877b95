//! Redis server for integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::Redis;
use trigcache_core::Namespace;

/// A Redis server: `REDIS_URL` if set, otherwise a fresh container.
///
/// The container is stopped when this value drops.
pub struct RedisServer {
    url: String,
    _container: Option<ContainerAsync<Redis>>,
}

impl RedisServer {
    pub async fn start() -> Self {
        if let Ok(url) = std::env::var("REDIS_URL") {
            return Self {
                url,
                _container: None,
            };
        }

        let container = Redis::default()
            .start()
            .await
            .expect("Failed to start Redis container");
        let host = container
            .get_host()
            .await
            .expect("Failed to get Redis container host");
        let port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get Redis container port");
        Self {
            url: format!("redis://{host}:{port}/"),
            _container: Some(container),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Namespace no other test in this process uses.
///
/// A shared `REDIS_URL` server may hold keys from earlier runs, so the
/// environment segment includes the process id.
pub fn unique_namespace(app: &str) -> Namespace {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let n = NEXT.fetch_add(1, Ordering::SeqCst);
    Namespace::new(app, format!("test-{}-{n}", std::process::id())).expect("valid namespace")
}
