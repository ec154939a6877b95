//! Process configuration.
//!
//! ```yaml
//! namespace:
//!   app: tuk
//!   environment: production
//! redis:
//!   url: redis://cache.internal:6379/0
//!   connect_timeout: 2s
//! cache:
//!   default_ttl: 5m
//! quota:
//!   layers:
//!     Outdoor_3857: 16
//!     Leisure_27700: 5
//!   counter_expiry: 14d
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use trigcache_backend::Store;
use trigcache_core::{DEFAULT_KEY_VERSION, KeyCodec, Namespace};

use crate::cache::{CacheStore, DEFAULT_SCAN_BATCH, DEFAULT_TTL};
use crate::error::ConfigError;
use crate::quota::{
    DEFAULT_COUNTER_EXPIRY, DEFAULT_MAX_FREE_ZOOM, LayerTable, MIN_COUNTER_EXPIRY, QuotaTracker,
    UsageLimits,
};
use crate::store::SharedStore;

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development.
    #[default]
    Development,
    /// Pre-production.
    Staging,
    /// Live site.
    Production,
    /// Automated tests.
    Test,
}

impl Environment {
    /// Short form used as the second key segment.
    pub const fn key_segment(&self) -> &'static str {
        match self {
            Environment::Development => "dev",
            Environment::Staging => "staging",
            Environment::Production => "prod",
            Environment::Test => "test",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_segment())
    }
}

/// Application and environment prefix of every key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSettings {
    /// Application name.
    #[serde(default = "default_app")]
    pub app: String,
    /// Deployment environment.
    #[serde(default)]
    pub environment: Environment,
}

impl Default for NamespaceSettings {
    fn default() -> Self {
        Self {
            app: default_app(),
            environment: Environment::default(),
        }
    }
}

/// Connection to the Redis store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Connection URL, e.g. `redis://127.0.0.1:6379/0`.
    pub url: String,
    /// Deadline for establishing the connection (e.g. "2s", "500ms").
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Deadline for each command (e.g. "2s", "500ms").
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub response_timeout: Duration,
}

/// Response cache behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Version tag appended to every key.
    #[serde(default = "default_version")]
    pub version: String,
    /// TTL of routes that don't set their own (e.g. "5m").
    #[serde(default = "default_ttl", with = "humantime_serde")]
    pub default_ttl: Duration,
    /// Keys scanned and deleted per step of a bulk delete.
    #[serde(default = "default_scan_batch")]
    pub scan_batch: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            version: default_version(),
            default_ttl: default_ttl(),
            scan_batch: default_scan_batch(),
        }
    }
}

/// Tile quota behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSettings {
    /// Explicit ceilings, replacing the per-environment defaults.
    #[serde(default)]
    pub limits: Option<UsageLimits>,
    /// Layer name to highest free zoom, added to the built-in table.
    #[serde(default)]
    pub layers: BTreeMap<String, u8>,
    /// Highest free zoom for layers not in the table.
    #[serde(default = "default_max_free_zoom")]
    pub default_max_free_zoom: u8,
    /// Counter lifetime after the last increment (e.g. "14d"), at least
    /// eight days.
    #[serde(default = "default_counter_expiry", with = "humantime_serde")]
    pub counter_expiry: Duration,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            limits: None,
            layers: BTreeMap::new(),
            default_max_free_zoom: default_max_free_zoom(),
            counter_expiry: default_counter_expiry(),
        }
    }
}

/// Complete trigcache configuration.
///
/// Every section is optional; [`Settings::default`] is a working
/// development setup. Without a `redis` section the process runs on an
/// in-process store (feature `memory`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Key namespace.
    #[serde(default)]
    pub namespace: NamespaceSettings,
    /// Shared store connection.
    #[serde(default)]
    pub redis: Option<RedisSettings>,
    /// Response cache.
    #[serde(default)]
    pub cache: CacheSettings,
    /// Tile quota.
    #[serde(default)]
    pub quota: QuotaSettings,
}

impl Settings {
    /// Parses a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_saphyr::from_str(yaml)?)
    }

    /// Reads and parses a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Validated key namespace.
    pub fn namespace(&self) -> Result<Namespace, ConfigError> {
        Ok(Namespace::new(
            &self.namespace.app,
            self.namespace.environment.key_segment(),
        )?)
    }

    /// Key codec for the configured namespace and version.
    pub fn key_codec(&self) -> Result<KeyCodec, ConfigError> {
        Ok(KeyCodec::new(self.namespace()?).with_version(&self.cache.version)?)
    }

    /// Ceilings: the explicit `limits` section, or the defaults of the
    /// environment.
    pub fn usage_limits(&self) -> UsageLimits {
        self.quota
            .limits
            .unwrap_or_else(|| UsageLimits::for_environment(self.namespace.environment))
    }

    /// Built-in layer table extended with the configured layers.
    pub fn layer_table(&self) -> LayerTable {
        self.quota.layers.iter().fold(
            LayerTable::default().with_default_max_free_zoom(self.quota.default_max_free_zoom),
            |table, (layer, zoom)| table.with_layer(layer, *zoom),
        )
    }

    /// Builds the configured store.
    ///
    /// Redis when a `redis` section is present, the in-process store
    /// otherwise. No connection is made here.
    pub fn build_store(&self) -> Result<Arc<dyn Store>, ConfigError> {
        match &self.redis {
            Some(redis) => build_redis(redis),
            None => build_memory(),
        }
    }

    /// Builds the configured store behind a [`SharedStore`] handle.
    pub fn shared_store(&self) -> Result<SharedStore, ConfigError> {
        Ok(SharedStore::from_arc(self.build_store()?))
    }

    /// Cache client over `store`.
    pub fn cache_store(&self, store: &SharedStore) -> Result<CacheStore, ConfigError> {
        Ok(CacheStore::new(store.clone(), self.key_codec()?)
            .with_scan_batch(self.cache.scan_batch)
            .with_default_ttl(self.cache.default_ttl))
    }

    /// Quota tracker over `store`.
    ///
    /// Fails if `counter_expiry` is below [`MIN_COUNTER_EXPIRY`].
    pub fn quota_tracker(&self, store: &SharedStore) -> Result<QuotaTracker, ConfigError> {
        if self.quota.counter_expiry < MIN_COUNTER_EXPIRY {
            return Err(ConfigError::CounterExpiryTooShort {
                configured: self.quota.counter_expiry,
                minimum: MIN_COUNTER_EXPIRY,
            });
        }
        Ok(
            QuotaTracker::new(store.clone(), self.namespace()?, self.usage_limits())
                .with_layers(self.layer_table())
                .with_counter_expiry(self.quota.counter_expiry),
        )
    }
}

#[cfg(feature = "redis")]
fn build_redis(settings: &RedisSettings) -> Result<Arc<dyn Store>, ConfigError> {
    use trigcache_redis::RedisStore;

    let store = RedisStore::builder()
        .server(settings.url.clone())
        .connect_timeout(settings.connect_timeout)
        .response_timeout(settings.response_timeout)
        .build()
        .map_err(|e| ConfigError::InvalidStore {
            store: "redis",
            reason: e.to_string(),
        })?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
fn build_redis(_settings: &RedisSettings) -> Result<Arc<dyn Store>, ConfigError> {
    Err(ConfigError::StoreNotAvailable("redis"))
}

#[cfg(feature = "memory")]
fn build_memory() -> Result<Arc<dyn Store>, ConfigError> {
    Ok(Arc::new(trigcache_memory::MemoryStore::new()))
}

#[cfg(not(feature = "memory"))]
fn build_memory() -> Result<Arc<dyn Store>, ConfigError> {
    Err(ConfigError::StoreNotAvailable("memory"))
}

fn default_app() -> String {
    "trigpointing".to_owned()
}

fn default_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_version() -> String {
    DEFAULT_KEY_VERSION.to_owned()
}

fn default_ttl() -> Duration {
    DEFAULT_TTL
}

fn default_scan_batch() -> usize {
    DEFAULT_SCAN_BATCH
}

fn default_max_free_zoom() -> u8 {
    DEFAULT_MAX_FREE_ZOOM
}

fn default_counter_expiry() -> Duration {
    DEFAULT_COUNTER_EXPIRY
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::{Classification, Dimension};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_yaml_str("{}").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.namespace().unwrap().prefix(), "trigpointing:dev");
        assert_eq!(settings.cache.default_ttl, Duration::from_secs(300));
        assert_eq!(settings.usage_limits(), UsageLimits::reduced());
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
namespace:
  app: tuk
  environment: production
redis:
  url: redis://cache.internal:6379/0
  connect_timeout: 500ms
cache:
  version: v2
  default_ttl: 1m
  scan_batch: 100
quota:
  layers:
    Satellite_3857: 12
  default_max_free_zoom: 14
  counter_expiry: 21d
"#;
        let settings = Settings::from_yaml_str(yaml).unwrap();
        let redis = settings.redis.as_ref().unwrap();
        assert_eq!(redis.connect_timeout, Duration::from_millis(500));
        assert_eq!(redis.response_timeout, Duration::from_secs(2));
        assert_eq!(settings.key_codec().unwrap().version(), "v2");
        assert_eq!(settings.namespace().unwrap().prefix(), "tuk:prod");
        assert_eq!(settings.usage_limits(), UsageLimits::production());
        assert_eq!(settings.quota.counter_expiry, Duration::from_secs(21 * 24 * 3600));

        let layers = settings.layer_table();
        assert_eq!(layers.max_free_zoom("Satellite_3857"), 12);
        assert_eq!(layers.max_free_zoom("Leisure_27700"), 5);
        assert_eq!(layers.max_free_zoom("Unlisted"), 14);
    }

    #[test]
    fn test_explicit_limits_override_environment() {
        let yaml = r#"
namespace:
  environment: production
quota:
  limits:
    global: { free: 10, metered: 5 }
    per_user: { free: 10, metered: 5 }
    anonymous: { free: 10, metered: 5 }
    per_client_address: { free: 10, metered: 5 }
"#;
        let settings = Settings::from_yaml_str(yaml).unwrap();
        assert_eq!(
            settings
                .usage_limits()
                .limit(Dimension::Global, Classification::Metered),
            5
        );
    }

    #[test]
    fn test_rejects_bad_namespace() {
        let settings = Settings::from_yaml_str("namespace: { app: 'a:b' }").unwrap();
        assert!(matches!(settings.namespace(), Err(ConfigError::Key(_))));
    }

    #[test]
    fn test_rejects_unknown_environment() {
        assert!(matches!(
            Settings::from_yaml_str("namespace: { environment: qa }"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_default_settings_run_in_process() {
        let settings = Settings::default();
        let store = settings.shared_store().unwrap();
        let cache = settings.cache_store(&store).unwrap();
        let key = cache
            .codec()
            .key(&trigcache_core::ResourceType::new("trig").unwrap())
            .id(1)
            .build();
        assert!(cache.set(&key, &1, Duration::from_secs(60)).await);
        assert!(settings.quota_tracker(&store).is_ok());
    }

    #[test]
    fn test_rejects_short_counter_expiry() {
        let store = SharedStore::new(trigcache_memory::MemoryStore::new());
        let settings = Settings::from_yaml_str("quota: { counter_expiry: 1h }").unwrap();
        assert!(matches!(
            settings.quota_tracker(&store),
            Err(ConfigError::CounterExpiryTooShort { configured, .. })
                if configured == Duration::from_secs(3600)
        ));

        let settings = Settings::from_yaml_str("quota: { counter_expiry: 8d }").unwrap();
        let tracker = settings.quota_tracker(&store).unwrap();
        assert_eq!(tracker.counter_expiry(), MIN_COUNTER_EXPIRY);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Settings::from_path("/nonexistent/trigcache.yaml"),
            Err(ConfigError::Read { .. })
        ));
    }
}
