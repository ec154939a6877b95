use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::ready;
use http::header::{HeaderName, HeaderValue};
use http::Response;
use http_body::Body as HttpBody;
use pin_project::pin_project;
use trigcache_core::CacheAnnotation;

use crate::body::CacheBody;

pub(crate) type Outcome<ResBody, E> = (
    Result<Response<CacheBody<ResBody>>, E>,
    Option<CacheAnnotation>,
);

/// Future returned by [`CacheService`](crate::CacheService).
///
/// Resolves the cache lookup and upstream call, then adds the cache headers
/// described by the annotation. Requests the cache does not handle carry no
/// annotation and get no headers.
#[pin_project]
pub struct CacheServiceFuture<ResBody, E>
where
    ResBody: HttpBody,
{
    #[pin]
    inner: BoxFuture<'static, Outcome<ResBody, E>>,
}

impl<ResBody, E> CacheServiceFuture<ResBody, E>
where
    ResBody: HttpBody,
{
    pub(crate) fn new(inner: BoxFuture<'static, Outcome<ResBody, E>>) -> Self {
        Self { inner }
    }
}

impl<ResBody, E> Future for CacheServiceFuture<ResBody, E>
where
    ResBody: HttpBody,
{
    type Output = Result<Response<CacheBody<ResBody>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let (result, annotation) = ready!(this.inner.poll(cx));

        let response = result.map(|mut response| {
            if let Some(annotation) = annotation {
                annotate(&mut response, &annotation);
            }
            response
        });
        Poll::Ready(response)
    }
}

fn annotate<B>(response: &mut Response<B>, annotation: &CacheAnnotation) {
    let headers = response.headers_mut();
    for (name, value) in annotation.headers() {
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.insert(HeaderName::from_static(name), value);
            }
            Err(error) => tracing::warn!(header = name, %error, "cache header skipped"),
        }
    }
}
