//! Weekly tile quota in front of a tile proxy route.

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use http::header::{CONTENT_TYPE, HeaderValue, RETRY_AFTER};
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;
use serde_json::json;
use tower::{Layer, Service};
use trigcache::{QuotaDecision, QuotaDenial, QuotaTracker, UsageRequest};

use crate::body::CacheBody;
use crate::extension::ServedFromCache;

/// Tower layer enforcing a [`QuotaTracker`].
///
/// `extract` turns a request into a [`UsageRequest`]; requests it returns
/// `None` for are not counted. Each counted request is checked before the
/// upstream runs, rejected with `429 Too Many Requests` at a ceiling, and
/// recorded only when the upstream answers with a success status.
pub struct QuotaLayer<X> {
    tracker: QuotaTracker,
    extract: Arc<X>,
}

impl<X> QuotaLayer<X> {
    pub fn new(tracker: QuotaTracker, extract: X) -> Self {
        Self {
            tracker,
            extract: Arc::new(extract),
        }
    }
}

impl<X> Clone for QuotaLayer<X> {
    fn clone(&self) -> Self {
        Self {
            tracker: self.tracker.clone(),
            extract: Arc::clone(&self.extract),
        }
    }
}

impl<X> fmt::Debug for QuotaLayer<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaLayer")
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl<S, X> Layer<S> for QuotaLayer<X> {
    type Service = QuotaService<S, X>;

    fn layer(&self, upstream: S) -> Self::Service {
        QuotaService {
            upstream,
            tracker: self.tracker.clone(),
            extract: Arc::clone(&self.extract),
        }
    }
}

/// Service produced by [`QuotaLayer`].
pub struct QuotaService<S, X> {
    upstream: S,
    tracker: QuotaTracker,
    extract: Arc<X>,
}

impl<S: Clone, X> Clone for QuotaService<S, X> {
    fn clone(&self) -> Self {
        Self {
            upstream: self.upstream.clone(),
            tracker: self.tracker.clone(),
            extract: Arc::clone(&self.extract),
        }
    }
}

impl<S, X, ReqBody, ResBody> Service<Request<ReqBody>> for QuotaService<S, X>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + 'static,
    X: Fn(&Request<ReqBody>) -> Option<UsageRequest>,
    ReqBody: Send + 'static,
    ResBody: HttpBody + Send + 'static,
{
    type Response = Response<CacheBody<ResBody>>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.upstream.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let clone = self.upstream.clone();
        let mut upstream = std::mem::replace(&mut self.upstream, clone);
        let tracker = self.tracker.clone();
        let usage = (self.extract.as_ref())(&request);

        Box::pin(async move {
            let Some(mut usage) = usage else {
                let response = upstream.call(request).await?;
                return Ok(response.map(CacheBody::Passthrough));
            };

            if let QuotaDecision::Denied(denial) = tracker.check(&usage).await {
                tracing::info!(
                    dimension = denial.dimension.as_str(),
                    classification = %denial.classification,
                    layer = %usage.layer,
                    zoom = usage.zoom,
                    "tile request rejected by weekly quota"
                );
                return Ok(denial_response(&denial));
            }

            let response = upstream.call(request).await?;
            if response.status().is_success() {
                if response.extensions().get::<ServedFromCache>().is_some() {
                    usage.from_cache = true;
                }
                tracker.record(&usage).await;
            }
            Ok(response.map(CacheBody::Passthrough))
        })
    }
}

/// `429 Too Many Requests` for a quota denial.
///
/// `Retry-After` carries the seconds until the weekly reset; the JSON body
/// names the exhausted dimension.
pub fn denial_response<B>(denial: &QuotaDenial) -> Response<CacheBody<B>>
where
    B: HttpBody,
{
    let retry_after = denial.retry_after().as_secs().max(1);
    let body = json!({
        "detail": denial.to_string(),
        "dimension": denial.dimension.as_str(),
        "classification": denial.classification.as_str(),
        "used": denial.used,
        "limit": denial.limit,
        "week": denial.week.to_string(),
        "retry_after": retry_after,
    });

    let mut response = Response::new(CacheBody::full(body.to_string()));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    response
}
