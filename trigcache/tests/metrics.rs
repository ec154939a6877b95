//! Checks that cache and quota events reach the metrics recorder with the
//! expected labels.

#![cfg(feature = "metrics")]

use std::convert::Infallible;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use metrics_util::MetricKind;
use serde_json::{Value, json};
use trigcache::quota::{Classification, Dimension};
use trigcache::{
    CachePolicy, CacheStore, CallArgs, CachingMiddleware, EndpointPolicy, KeyCodec, Namespace,
    QuotaTracker, ResourceType, SharedStore, UsageLimits, UsageRequest,
};
use trigcache_memory::MemoryStore;

/// Counter value for `name` whose labels include every pair in `labels`.
fn counter(snapshotter: &Snapshotter, name: &str, labels: &[(&str, &str)]) -> Option<u64> {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .find_map(|(key, _, _, value)| {
            let matches = key.kind() == MetricKind::Counter
                && key.key().name() == name
                && labels.iter().all(|(k, v)| {
                    key.key()
                        .labels()
                        .any(|label| label.key() == *k && label.value() == *v)
                });
            match value {
                DebugValue::Counter(n) if matches => Some(n),
                _ => None,
            }
        })
}

fn with_recorder<F>(test: F) -> Snapshotter
where
    F: Future<Output = ()>,
{
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    metrics::with_local_recorder(&recorder, || {
        // The local recorder is thread-bound, so everything runs on this thread.
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(test);
    });
    snapshotter
}

#[test]
fn test_cache_status_counters() {
    let snapshotter = with_recorder(async {
        let cache = CacheStore::new(
            SharedStore::new(MemoryStore::new()),
            KeyCodec::new(Namespace::new("tuk", "test").unwrap()),
        );
        let middleware = CachingMiddleware::new(
            cache,
            EndpointPolicy::new(ResourceType::new("trig").unwrap()).resource_id_param("trig_id"),
        );
        let handler = |_: CallArgs| async {
            Ok::<_, Infallible>(CachePolicy::<Value, ()>::Cacheable(json!({"n": 1})))
        };
        let args = CallArgs::new().with("trig_id", 1);

        middleware.call(args.clone(), handler).await.unwrap();
        middleware.call(args.clone(), handler).await.unwrap();
        middleware.call(args.clone(), handler).await.unwrap();
        middleware.call(args.bypass(true), handler).await.unwrap();
    });

    let labels = [("resource", "trig")];
    assert_eq!(counter(&snapshotter, "trigcache_cache_miss_total", &labels), Some(1));
    assert_eq!(counter(&snapshotter, "trigcache_cache_hit_total", &labels), Some(2));
    assert_eq!(counter(&snapshotter, "trigcache_cache_bypass_total", &labels), Some(1));
}

#[test]
fn test_write_errors_counted_when_store_is_down() {
    let snapshotter = with_recorder(async {
        let cache = CacheStore::new(
            SharedStore::new(MemoryStore::unreachable()),
            KeyCodec::new(Namespace::new("tuk", "test").unwrap()),
        );
        let middleware =
            CachingMiddleware::new(cache, EndpointPolicy::new(ResourceType::new("stats").unwrap()));
        middleware
            .call(CallArgs::new(), |_| async {
                Ok::<_, Infallible>(CachePolicy::<u32, ()>::Cacheable(7))
            })
            .await
            .unwrap();
    });

    assert_eq!(
        counter(&snapshotter, "trigcache_cache_write_errors_total", &[("resource", "stats")]),
        Some(1)
    );
}

#[test]
fn test_quota_counters() {
    let snapshotter = with_recorder(async {
        let limits = UsageLimits::reduced().with_limit(Dimension::Global, Classification::Metered, 1);
        let namespace = Namespace::new("tuk", "test").unwrap();
        let tracker = QuotaTracker::new(SharedStore::new(MemoryStore::new()), namespace.clone(), limits);
        let metered = UsageRequest::new("Outdoor_3857", 18);

        assert!(tracker.check(&metered).await.is_allowed());
        tracker.record(&metered).await;
        assert!(!tracker.check(&metered).await.is_allowed());

        let down = QuotaTracker::new(SharedStore::new(MemoryStore::unreachable()), namespace, limits);
        assert!(down.check(&metered).await.is_allowed());
    });

    assert_eq!(
        counter(
            &snapshotter,
            "trigcache_quota_checks_total",
            &[("outcome", "allowed"), ("classification", "metered")]
        ),
        Some(2)
    );
    assert_eq!(
        counter(&snapshotter, "trigcache_quota_denials_total", &[("dimension", "global")]),
        Some(1)
    );
    assert_eq!(counter(&snapshotter, "trigcache_quota_fail_open_total", &[]), Some(1));
}
