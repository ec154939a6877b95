//! Minimal axum API with cached trig routes and a metered tile route.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use http::{HeaderValue, Request, StatusCode, header};
use serde::Deserialize;
use serde_json::json;
use trigcache::{CacheStore, EndpointPolicy, QuotaTracker, ResourceType, UsageRequest};
use trigcache_tower::{Cache, NonCacheable, QuotaLayer, client_address};

/// Handler call counts.
#[derive(Debug, Clone, Default)]
pub struct Calls {
    trig: Arc<AtomicUsize>,
    logs: Arc<AtomicUsize>,
    tiles: Arc<AtomicUsize>,
}

impl Calls {
    pub fn trig(&self) -> usize {
        self.trig.load(Ordering::SeqCst)
    }

    pub fn logs(&self) -> usize {
        self.logs.load(Ordering::SeqCst)
    }

    pub fn tiles(&self) -> usize {
        self.tiles.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Deserialize)]
struct Pagination {
    limit: Option<u32>,
    skip: Option<u32>,
}

async fn get_trig(State(calls): State<Calls>, Path(trig_id): Path<u32>) -> Response {
    calls.trig.fetch_add(1, Ordering::SeqCst);
    match trig_id {
        0 => (StatusCode::NOT_FOUND, Json(json!({"detail": "trig not found"}))).into_response(),
        _ => Json(json!({"id": trig_id, "name": format!("TP{trig_id:04}")})).into_response(),
    }
}

async fn get_trig_logs(
    State(calls): State<Calls>,
    Path(trig_id): Path<u32>,
    Query(page): Query<Pagination>,
) -> Response {
    calls.logs.fetch_add(1, Ordering::SeqCst);
    let limit = page.limit.unwrap_or(20);
    let skip = page.skip.unwrap_or(0);
    let mut response = Json(json!({
        "trig_id": trig_id,
        "limit": limit,
        "skip": skip,
        "items": [],
    }))
    .into_response();
    // Logs of trig 13 include private notes
    if trig_id == 13 {
        response.extensions_mut().insert(NonCacheable);
    }
    response
}

async fn get_tile(
    State(calls): State<Calls>,
    Path((_layer, _z, _x, _y)): Path<(String, u8, u32, u32)>,
) -> Response {
    calls.tiles.fetch_add(1, Ordering::SeqCst);
    let mut response = Response::new(axum::body::Body::from(&b"\x89PNG"[..]));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    response
}

/// `/tiles/{layer}/{z}/{x}/{y}`, user from the `x-user-id` header.
pub fn tile_usage<B>(request: &Request<B>) -> Option<UsageRequest> {
    let mut segments = request.uri().path().trim_start_matches('/').split('/');
    if segments.next()? != "tiles" {
        return None;
    }
    let layer = segments.next()?;
    let zoom = segments.next()?.parse().ok()?;

    let mut usage = UsageRequest::new(layer, zoom);
    if let Some(user) = request
        .headers()
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
    {
        usage = usage.user(user);
    }
    if let Some(address) = client_address(request.headers()) {
        usage = usage.client_address(address);
    }
    Some(usage)
}

/// Router with:
///
/// - `GET /trigs/{trig_id}` cached under `trig` for 10 minutes
/// - `GET /trigs/{trig_id}/logs` cached under `trig:{id}:logs` for 1 minute
/// - `GET /tiles/{layer}/{z}/{x}/{y}` behind the weekly quota
pub fn router(cache: CacheStore, tracker: QuotaTracker, calls: Calls) -> Router {
    let trig = Cache::builder(
        cache.clone(),
        EndpointPolicy::new(ResourceType::new("trig").expect("valid resource type"))
            .resource_id_param("trig_id")
            .ttl(Duration::from_secs(600)),
    )
    .path("/trigs/{trig_id}")
    .build();

    let logs = Cache::builder(
        cache,
        EndpointPolicy::new(ResourceType::new("trig").expect("valid resource type"))
            .resource_id_param("trig_id")
            .subresource("logs")
            .ttl(Duration::from_secs(60)),
    )
    .path("/trigs/{trig_id}/logs")
    .build();

    Router::new()
        .route("/trigs/{trig_id}", get(get_trig).layer(trig))
        .route("/trigs/{trig_id}/logs", get(get_trig_logs).layer(logs))
        .route(
            "/tiles/{layer}/{z}/{x}/{y}",
            get(get_tile).layer(QuotaLayer::new(tracker, tile_usage::<axum::body::Body>)),
        )
        .with_state(calls)
}
