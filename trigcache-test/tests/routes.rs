//! The demo API driven through `tower::ServiceExt::oneshot`.

use axum::Router;
use axum::body::Body;
use bytes::Bytes;
use http::{Request, Response, StatusCode, header};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;
use trigcache::quota::{Classification, Dimension};
use trigcache::{CacheStore, KeyCodec, Namespace, QuotaTracker, ResourceType, SharedStore, UsageLimits};
use trigcache_memory::MemoryStore;
use trigcache_test::app::{Calls, router};

struct Api {
    router: Router,
    calls: Calls,
    cache: CacheStore,
    tracker: QuotaTracker,
    memory: MemoryStore,
}

fn api(limits: UsageLimits) -> Api {
    let memory = MemoryStore::new();
    let shared = SharedStore::new(memory.clone());
    let namespace = Namespace::new("tuk", "test").unwrap();
    let cache = CacheStore::new(shared.clone(), KeyCodec::new(namespace.clone()));
    let tracker = QuotaTracker::new(shared, namespace, limits);
    let calls = Calls::default();
    Api {
        router: router(cache.clone(), tracker.clone(), calls.clone()),
        calls,
        cache,
        tracker,
        memory,
    }
}

async fn get(router: &Router, uri: &str) -> Response<Body> {
    send(router, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn header_value<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn trig_is_cached_between_requests() {
    let api = api(UsageLimits::reduced());

    let miss = get(&api.router, "/trigs/42").await;
    assert_eq!(miss.status(), StatusCode::OK);
    assert_eq!(header_value(&miss, "x-cache-status"), Some("MISS"));
    assert_eq!(header_value(&miss, "x-cache-key"), Some("tuk:test:trig:42:v1"));
    assert_eq!(header_value(&miss, "x-cache-ttl"), Some("600"));
    assert_eq!(json_body(miss).await, json!({"id": 42, "name": "TP0042"}));

    let hit = get(&api.router, "/trigs/42").await;
    assert_eq!(header_value(&hit, "x-cache-status"), Some("HIT"));
    assert_eq!(header_value(&hit, "x-cache-age"), Some("0"));
    assert_eq!(
        hit.headers()[header::CONTENT_TYPE],
        "application/json"
    );
    assert_eq!(json_body(hit).await, json!({"id": 42, "name": "TP0042"}));
    assert_eq!(api.calls.trig(), 1);
}

#[tokio::test]
async fn no_cache_request_bypasses_and_keeps_entry() {
    let api = api(UsageLimits::reduced());
    get(&api.router, "/trigs/7").await;
    let writes = api.memory.counters().writes();

    let request = Request::get("/trigs/7")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::empty())
        .unwrap();
    let bypass = send(&api.router, request).await;
    assert_eq!(header_value(&bypass, "x-cache-status"), Some("BYPASS"));
    assert_eq!(api.calls.trig(), 2);
    assert_eq!(api.memory.counters().writes(), writes);

    let hit = get(&api.router, "/trigs/7").await;
    assert_eq!(header_value(&hit, "x-cache-status"), Some("HIT"));
}

#[tokio::test]
async fn query_parameters_select_distinct_entries() {
    let api = api(UsageLimits::reduced());

    let first = get(&api.router, "/trigs/5/logs?limit=10&skip=0").await;
    let same = get(&api.router, "/trigs/5/logs?skip=0&limit=10").await;
    let other = get(&api.router, "/trigs/5/logs?limit=10&skip=10").await;

    assert_eq!(header_value(&first, "x-cache-status"), Some("MISS"));
    assert_eq!(header_value(&same, "x-cache-status"), Some("HIT"));
    assert_eq!(header_value(&other, "x-cache-status"), Some("MISS"));
    assert_eq!(header_value(&first, "x-cache-key"), header_value(&same, "x-cache-key"));
    assert_ne!(header_value(&first, "x-cache-key"), header_value(&other, "x-cache-key"));
    assert!(
        header_value(&first, "x-cache-key")
            .unwrap()
            .starts_with("tuk:test:trig:5:logs:params_")
    );
    assert_eq!(api.calls.logs(), 2);
}

#[tokio::test]
async fn repeated_query_parameters_are_not_collapsed() {
    let api = api(UsageLimits::reduced());

    let both = get(&api.router, "/trigs/5/logs?county=Kent&county=Essex").await;
    let last_only = get(&api.router, "/trigs/5/logs?county=Essex").await;
    let both_again = get(&api.router, "/trigs/5/logs?county=Kent&county=Essex").await;

    assert_eq!(header_value(&both, "x-cache-status"), Some("MISS"));
    assert_eq!(header_value(&last_only, "x-cache-status"), Some("MISS"));
    assert_eq!(header_value(&both_again, "x-cache-status"), Some("HIT"));
    assert_ne!(
        header_value(&both, "x-cache-key"),
        header_value(&last_only, "x-cache-key")
    );
    assert_eq!(api.calls.logs(), 2);
}

#[tokio::test]
async fn errors_and_marked_responses_are_not_stored() {
    let api = api(UsageLimits::reduced());

    for _ in 0..2 {
        let missing = get(&api.router, "/trigs/0").await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(header_value(&missing, "x-cache-status"), Some("MISS"));

        let private = get(&api.router, "/trigs/13/logs").await;
        assert_eq!(private.status(), StatusCode::OK);
        assert_eq!(header_value(&private, "x-cache-status"), Some("MISS"));
    }
    assert_eq!(api.calls.trig(), 2);
    assert_eq!(api.calls.logs(), 2);
    assert!(api.memory.is_empty());
}

#[tokio::test]
async fn invalidation_after_a_write() {
    let api = api(UsageLimits::reduced());
    get(&api.router, "/trigs/3").await;
    get(&api.router, "/trigs/3/logs").await;
    get(&api.router, "/trigs/4").await;

    let trig = ResourceType::new("trig").unwrap();
    assert_eq!(api.cache.invalidate_resource(&trig, Some("3")).await, 2);

    let refetched = get(&api.router, "/trigs/3").await;
    assert_eq!(header_value(&refetched, "x-cache-status"), Some("MISS"));
    let untouched = get(&api.router, "/trigs/4").await;
    assert_eq!(header_value(&untouched, "x-cache-status"), Some("HIT"));
}

#[tokio::test]
async fn tiles_are_rejected_at_the_weekly_ceiling() {
    let limits = UsageLimits::reduced().with_limit(Dimension::PerUser, Classification::Metered, 2);
    let api = api(limits);

    let tile = |user: &str, zoom: u8| {
        Request::get(format!("/tiles/Outdoor_3857/{zoom}/1/1"))
            .header("x-user-id", user)
            .header("x-forwarded-for", "192.0.2.10")
            .body(Body::empty())
            .unwrap()
    };

    for _ in 0..2 {
        let response = send(&api.router, tile("dave", 17)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_value(&response, "content-type"), Some("image/png"));
    }

    let rejected = send(&api.router, tile("dave", 17)).await;
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(header_value(&rejected, "retry-after").is_some());
    let body = json_body(rejected).await;
    assert_eq!(body["dimension"], "user");
    assert_eq!(body["classification"], "metered");
    assert_eq!(api.calls.tiles(), 2);

    // Free zooms and other users are unaffected.
    assert_eq!(send(&api.router, tile("dave", 14)).await.status(), StatusCode::OK);
    assert_eq!(send(&api.router, tile("erin", 17)).await.status(), StatusCode::OK);

    let report = api
        .tracker
        .get_usage_stats(Some("dave"), "192.0.2.10".parse().ok())
        .await
        .unwrap();
    let entry = report
        .entry(Dimension::PerUser, Classification::Metered)
        .unwrap();
    assert_eq!((entry.used, entry.remaining), (2, 0));
    let ip = report
        .entry(Dimension::PerClientAddress, Classification::Metered)
        .unwrap();
    assert_eq!(ip.used, 3);
}

#[tokio::test]
async fn unreachable_store_keeps_serving() {
    let memory = MemoryStore::unreachable();
    let shared = SharedStore::new(memory.clone());
    let namespace = Namespace::new("tuk", "test").unwrap();
    let router = router(
        CacheStore::new(shared.clone(), KeyCodec::new(namespace.clone())),
        QuotaTracker::new(
            shared,
            namespace,
            UsageLimits::reduced().with_limit(Dimension::Global, Classification::Metered, 0),
        ),
        Calls::default(),
    );

    for _ in 0..2 {
        let trig = get(&router, "/trigs/1").await;
        assert_eq!(trig.status(), StatusCode::OK);
        assert_eq!(header_value(&trig, "x-cache-status"), Some("MISS"));
    }
    // Fails open even though the ceiling is zero.
    let tile = get(&router, "/tiles/Leisure_27700/12/0/0").await;
    assert_eq!(tile.status(), StatusCode::OK);
    let _: Bytes = tile.into_body().collect().await.unwrap().to_bytes();
}
