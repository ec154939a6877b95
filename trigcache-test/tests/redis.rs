//! Cache and quota guarantees against a real Redis server.
//!
//! Tests that need a server are ignored by default: they start a Redis
//! container, or use `REDIS_URL` when set.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use serial_test::serial;
use trigcache::quota::{Classification, Dimension};
use trigcache::{
    CacheStore, ConnectionState, KeyCodec, Namespace, QuotaTracker, ResourceType, SharedStore,
    Store, UsageLimits, UsageRequest,
};
use trigcache_redis::RedisStore;
use trigcache_test::redis::{RedisServer, unique_namespace};

fn shared(server: &RedisServer) -> SharedStore {
    let store = RedisStore::builder()
        .server(server.url())
        .connect_timeout(Duration::from_secs(5))
        .response_timeout(Duration::from_secs(2))
        .build()
        .expect("valid redis url");
    SharedStore::from_arc(Arc::new(store))
}

fn cache(server: &RedisServer, namespace: Namespace) -> CacheStore {
    CacheStore::new(shared(server), KeyCodec::new(namespace))
}

#[tokio::test]
#[ignore = "requires Docker or REDIS_URL"]
#[serial]
async fn round_trip_and_expiry() {
    let server = RedisServer::start().await;
    let cache = cache(&server, unique_namespace("trigcache"));
    assert_eq!(cache.shared().connect().await, ConnectionState::Connected);

    let trig = ResourceType::new("trig").unwrap();
    let key = cache.codec().key(&trig).id(1).build();
    let value = json!({"id": 1, "name": "TP0001", "logs": [1, 2, 3]});
    assert!(cache.set(&key, &value, Duration::from_secs(60)).await);
    let (stored, age): (Value, _) = cache.get(&key).await.unwrap();
    assert_eq!(stored, value);
    assert!(age < Duration::from_secs(2));
    let remaining = cache.ttl(&key).await.unwrap();
    assert!(remaining > Duration::from_secs(55) && remaining <= Duration::from_secs(60));

    let short = cache.codec().key(&trig).id(2).build();
    assert!(cache.set(&short, &value, Duration::from_secs(1)).await);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(cache.get::<Value>(&short).await, None);

    assert!(cache.flush_namespace().await);
}

#[tokio::test]
#[ignore = "requires Docker or REDIS_URL"]
#[serial]
async fn pattern_delete_is_namespace_scoped() {
    let server = RedisServer::start().await;
    let app_x = cache(&server, unique_namespace("app-x"));
    let other = cache(&server, unique_namespace("other-app"));
    let trig = ResourceType::new("trig").unwrap();

    for id in 0..25 {
        let key = app_x.codec().key(&trig).id(id).build();
        app_x.set(&key, &id, Duration::from_secs(60)).await;
        let key = other.codec().key(&trig).id(id).build();
        other.set(&key, &id, Duration::from_secs(60)).await;
    }

    assert_eq!(app_x.delete_pattern("other-app:*").await, Ok(0));
    assert_eq!(other.with_scan_batch(10).delete_pattern("trig:*").await, Ok(25));

    let stats = app_x.stats().await.unwrap();
    assert_eq!(stats.key_count, 25);
    assert!(stats.total_keys >= 25);

    assert_eq!(app_x.purge_namespace().await, 25);
    assert_eq!(app_x.stats().await.unwrap().key_count, 0);
}

#[tokio::test]
#[ignore = "requires Docker or REDIS_URL"]
#[serial]
async fn quota_counters_are_shared_between_instances() {
    let server = RedisServer::start().await;
    let namespace = unique_namespace("trigcache");
    let limits = UsageLimits::reduced().with_limit(Dimension::Global, Classification::Metered, 5);
    // Two processes sharing one store.
    let first = QuotaTracker::new(shared(&server), namespace.clone(), limits);
    let second = QuotaTracker::new(shared(&server), namespace.clone(), limits);
    let request = UsageRequest::new("Outdoor_3857", 17);

    for n in 0..5 {
        let tracker = if n % 2 == 0 { &first } else { &second };
        assert!(tracker.check(&request).await.is_allowed());
        assert!(tracker.record(&request).await);
    }
    let denial = second.check(&request).await.into_result().unwrap_err();
    assert_eq!(denial.dimension, Dimension::Global);

    let report = first.get_usage_stats(None, None).await.unwrap();
    let anonymous = report
        .entry(Dimension::Anonymous, Classification::Metered)
        .unwrap();
    assert_eq!(anonymous.used, 5);

    // Counters carry an expiry so old weeks clean themselves up.
    let store = RedisStore::builder().server(server.url()).build().unwrap();
    let week = report.week.to_string();
    let key = namespace.scoped(&format!("quota:weekly:{week}:global:metered"));
    let ttl = store.remaining_ttl(&key).await.unwrap();
    assert!(ttl.is_some_and(|ttl| ttl > Duration::from_secs(7 * 24 * 3600)));

    CacheStore::new(shared(&server), KeyCodec::new(namespace))
        .purge_namespace()
        .await;
}

#[tokio::test]
async fn unreachable_server_disables_everything() {
    let store = RedisStore::builder()
        .server("redis://127.0.0.1:1/")
        .connect_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let shared = SharedStore::from_arc(Arc::new(store));
    let cache = CacheStore::new(shared.clone(), KeyCodec::new(unique_namespace("trigcache")));
    let tracker = QuotaTracker::new(shared.clone(), unique_namespace("trigcache"), UsageLimits::reduced());

    let key = cache.codec().key(&ResourceType::new("trig").unwrap()).id(1).build();
    assert!(!cache.set(&key, &1, Duration::from_secs(60)).await);
    assert!(tracker.check(&UsageRequest::new("Leisure_27700", 15)).await.is_allowed());
    assert_eq!(shared.state(), ConnectionState::Disabled);
}
