//! Connect-once handle to the shared store.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{info, warn};
use trigcache_backend::Store;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Where the handle is in its connection lifecycle.
///
/// ```text
/// Unknown ──▶ Probing ──▶ Connected
///                    └──▶ Disabled
/// ```
///
/// Both end states are final for the lifetime of the handle. A connected
/// handle relies on the store client's own reconnection; a disabled one turns
/// every cache and quota call into a cheap no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No call has touched the store yet.
    Unknown,
    /// The first call is pinging the store.
    Probing,
    /// The probe succeeded.
    Connected,
    /// The probe failed; caching and quota enforcement are off.
    Disabled,
}

impl ConnectionState {
    /// Lowercase name for logs and health endpoints.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Unknown => "unknown",
            ConnectionState::Probing => "probing",
            ConnectionState::Connected => "connected",
            ConnectionState::Disabled => "disabled",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Inner {
    store: Arc<dyn Store>,
    connected: OnceCell<bool>,
    probing: AtomicBool,
    probe_timeout: Duration,
}

/// Store handle shared by [`CacheStore`](crate::CacheStore) and
/// [`QuotaTracker`](crate::QuotaTracker).
///
/// Construct one at process start and hand clones to every component. The
/// first operation (or an explicit [`connect`](Self::connect)) pings the
/// store exactly once, concurrent callers wait for that probe.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Inner>,
}

impl fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedStore")
            .field("store", &self.inner.store.name())
            .field("state", &self.state())
            .finish()
    }
}

impl SharedStore {
    /// Wraps `store`.
    pub fn new<S>(store: S) -> Self
    where
        S: Store + 'static,
    {
        Self::from_arc(Arc::new(store))
    }

    /// Wraps an already shared store.
    pub fn from_arc(store: Arc<dyn Store>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                connected: OnceCell::new(),
                probing: AtomicBool::new(false),
                probe_timeout: DEFAULT_PROBE_TIMEOUT,
            }),
        }
    }

    /// Overrides how long the initial probe may take.
    ///
    /// Only effective before the handle is cloned.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.probe_timeout = timeout;
        }
        self
    }

    /// Name of the wrapped store.
    pub fn name(&self) -> &str {
        self.inner.store.name()
    }

    /// Current lifecycle state, without triggering a probe.
    pub fn state(&self) -> ConnectionState {
        match self.inner.connected.get() {
            Some(true) => ConnectionState::Connected,
            Some(false) => ConnectionState::Disabled,
            None if self.inner.probing.load(Ordering::Acquire) => ConnectionState::Probing,
            None => ConnectionState::Unknown,
        }
    }

    /// Probes the store if that has not happened yet and returns the
    /// resulting state.
    pub async fn connect(&self) -> ConnectionState {
        let connected = *self
            .inner
            .connected
            .get_or_init(|| async {
                self.inner.probing.store(true, Ordering::Release);
                let store = self.inner.store.name();
                let result =
                    tokio::time::timeout(self.inner.probe_timeout, self.inner.store.ping()).await;
                self.inner.probing.store(false, Ordering::Release);
                match result {
                    Ok(Ok(())) => {
                        info!(store, "shared store connected");
                        true
                    }
                    Ok(Err(error)) => {
                        warn!(store, %error, "shared store unreachable, caching and quota enforcement disabled");
                        false
                    }
                    Err(_) => {
                        warn!(
                            store,
                            timeout = ?self.inner.probe_timeout,
                            "shared store probe timed out, caching and quota enforcement disabled"
                        );
                        false
                    }
                }
            })
            .await;
        if connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disabled
        }
    }

    /// The store, if it is connected. Probes on first use.
    pub(crate) async fn available(&self) -> Option<&dyn Store> {
        match self.connect().await {
            ConnectionState::Connected => Some(self.inner.store.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trigcache_memory::MemoryStore;

    #[tokio::test]
    async fn test_connects_once() {
        let memory = MemoryStore::new();
        let shared = SharedStore::new(memory.clone());
        assert_eq!(shared.state(), ConnectionState::Unknown);

        assert_eq!(shared.connect().await, ConnectionState::Connected);

        // A later outage does not flip the state back.
        memory.set_available(false);
        assert_eq!(shared.connect().await, ConnectionState::Connected);
        assert!(shared.available().await.is_some());
    }

    #[tokio::test]
    async fn test_unreachable_store_is_disabled_for_good() {
        let memory = MemoryStore::unreachable();
        let shared = SharedStore::new(memory.clone());
        assert_eq!(shared.connect().await, ConnectionState::Disabled);

        memory.set_available(true);
        assert_eq!(shared.connect().await, ConnectionState::Disabled);
        assert!(shared.available().await.is_none());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let shared = SharedStore::new(MemoryStore::new());
        let clone = shared.clone();
        clone.connect().await;
        assert_eq!(shared.state(), ConnectionState::Connected);
    }
}
