use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use http_body::{Body as HttpBody, Frame, SizeHint};
use pin_project::pin_project;

/// Response body produced by the cache and quota services.
///
/// - [`Complete`](CacheBody::Complete): body held in memory, served from the
///   store or buffered to be stored
/// - [`Failed`](CacheBody::Failed): reading the upstream body failed while
///   buffering; the error is yielded once
/// - [`Passthrough`](CacheBody::Passthrough): upstream body, untouched
#[pin_project(project = CacheBodyProj)]
pub enum CacheBody<B>
where
    B: HttpBody,
{
    /// Body held in memory.
    ///
    /// The `Option` is used to yield the data once, then return `None` on subsequent polls.
    Complete(Option<Bytes>),

    /// Upstream body failed while being buffered.
    Failed(Option<B::Error>),

    /// Upstream body passed through without reading.
    Passthrough(#[pin] B),
}

impl<B: HttpBody> CacheBody<B> {
    /// In-memory body.
    pub fn full(bytes: impl Into<Bytes>) -> Self {
        CacheBody::Complete(Some(bytes.into()))
    }

    /// Empty body.
    pub fn empty() -> Self {
        CacheBody::Complete(None)
    }
}

impl<B> HttpBody for CacheBody<B>
where
    B: HttpBody,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            CacheBodyProj::Complete(data) => match data.take() {
                Some(bytes) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                None => Poll::Ready(None),
            },

            CacheBodyProj::Failed(error) => Poll::Ready(error.take().map(Err)),

            CacheBodyProj::Passthrough(body) => match body.poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    let frame = frame.map_data(|mut data| data.copy_to_bytes(data.remaining()));
                    Poll::Ready(Some(Ok(frame)))
                }
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            CacheBody::Complete(Some(bytes)) => SizeHint::with_exact(bytes.len() as u64),
            CacheBody::Complete(None) | CacheBody::Failed(_) => SizeHint::with_exact(0),
            CacheBody::Passthrough(body) => body.size_hint(),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            CacheBody::Complete(data) => data.is_none(),
            CacheBody::Failed(error) => error.is_none(),
            CacheBody::Passthrough(body) => body.is_end_stream(),
        }
    }
}

impl<B> std::fmt::Debug for CacheBody<B>
where
    B: HttpBody,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheBody::Complete(data) => f.debug_tuple("Complete").field(data).finish(),
            CacheBody::Failed(error) => f
                .debug_tuple("Failed")
                .field(&error.as_ref().map(|_| ".."))
                .finish(),
            CacheBody::Passthrough(_) => f.debug_tuple("Passthrough").finish(),
        }
    }
}
