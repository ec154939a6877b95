use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_TYPE, HeaderMap, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body::Body as HttpBody;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::Service;
use trigcache::{Cached, CachingMiddleware};
use trigcache_core::CachePolicy;

use crate::body::CacheBody;
use crate::extension::{NonCacheable, ServedFromCache};
use crate::future::CacheServiceFuture;
use crate::request::{PathTemplate, call_args};

/// Service produced by the [`Cache`](crate::Cache) layer.
///
/// `GET` requests matching the route are resolved through the
/// [`CachingMiddleware`]. A response is stored only if it is a `200` JSON
/// response without `Cache-Control: no-store`/`private` and without the
/// [`NonCacheable`] extension. Everything else is passed through untouched.
#[derive(Debug)]
pub struct CacheService<S> {
    upstream: S,
    middleware: CachingMiddleware,
    template: Option<Arc<PathTemplate>>,
}

impl<S> CacheService<S> {
    pub fn new(
        upstream: S,
        middleware: CachingMiddleware,
        template: Option<Arc<PathTemplate>>,
    ) -> Self {
        CacheService {
            upstream,
            middleware,
            template,
        }
    }
}

impl<S> Clone for CacheService<S>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            upstream: self.upstream.clone(),
            middleware: self.middleware.clone(),
            template: self.template.clone(),
        }
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CacheService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: HttpBody + Send + 'static,
    ResBody::Data: Send,
    ResBody::Error: Send,
{
    type Response = Response<CacheBody<ResBody>>;
    type Error = S::Error;
    type Future = CacheServiceFuture<ResBody, S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.upstream.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // The instance polled ready is the one that handles this request.
        let clone = self.upstream.clone();
        let mut upstream = std::mem::replace(&mut self.upstream, clone);

        let args = if request.method() == Method::GET {
            call_args(&request, self.template.as_deref())
        } else {
            None
        };
        let Some(args) = args else {
            return CacheServiceFuture::new(Box::pin(async move {
                let result = upstream
                    .call(request)
                    .await
                    .map(|response| response.map(CacheBody::Passthrough));
                (result, None)
            }));
        };

        let middleware = self.middleware.clone();
        CacheServiceFuture::new(Box::pin(async move {
            let mut fetched = None;
            let outcome = middleware
                .call(args, |_| fetch(upstream, request, &mut fetched))
                .await;

            match outcome {
                Ok(Cached { body, annotation }) => {
                    let response = match body {
                        CachePolicy::NonCacheable(response) => response,
                        CachePolicy::Cacheable(value) => match fetched.take() {
                            Some(response) => response.map(CacheBody::full),
                            None => stored_response(&value),
                        },
                    };
                    (Ok(response), Some(annotation))
                }
                Err(error) => (Err(error), None),
            }
        }))
    }
}

/// Calls upstream and decides whether the response may be stored.
///
/// A storable response is buffered and parked in `fetched` so the caller
/// gets the upstream status, headers and bytes back unchanged.
async fn fetch<S, ReqBody, ResBody>(
    mut upstream: S,
    request: Request<ReqBody>,
    fetched: &mut Option<Response<Bytes>>,
) -> Result<CachePolicy<Value, Response<CacheBody<ResBody>>>, S::Error>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ResBody: HttpBody,
{
    let (parts, body) = upstream.call(request).await?.into_parts();
    if !is_storable(&parts) {
        return Ok(CachePolicy::NonCacheable(Response::from_parts(
            parts,
            CacheBody::Passthrough(body),
        )));
    }

    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(error) => {
            return Ok(CachePolicy::NonCacheable(Response::from_parts(
                parts,
                CacheBody::Failed(Some(error)),
            )));
        }
    };
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => {
            *fetched = Some(Response::from_parts(parts, bytes));
            Ok(CachePolicy::Cacheable(value))
        }
        Err(error) => {
            tracing::debug!(%error, "response body is not JSON, not stored");
            Ok(CachePolicy::NonCacheable(Response::from_parts(
                parts,
                CacheBody::full(bytes),
            )))
        }
    }
}

fn is_storable(parts: &http::response::Parts) -> bool {
    parts.status == StatusCode::OK
        && parts.extensions.get::<NonCacheable>().is_none()
        && is_json(&parts.headers)
        && !forbids_storing(&parts.headers)
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|mime| {
            let mime = mime.trim();
            mime.eq_ignore_ascii_case("application/json")
                || mime.to_ascii_lowercase().ends_with("+json")
        })
        .unwrap_or(false)
}

fn forbids_storing(headers: &HeaderMap) -> bool {
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .any(|d| d.eq_ignore_ascii_case("no-store") || d.eq_ignore_ascii_case("private"))
}

fn stored_response<B>(value: &Value) -> Response<CacheBody<B>>
where
    B: HttpBody,
{
    let mut response = Response::new(CacheBody::full(value.to_string()));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response.extensions_mut().insert(ServedFromCache);
    response
}
