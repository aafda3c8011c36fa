//! Response capture: tap an upstream response while it streams to the caller.
//!
//! [`capture_response`] wraps a response body in a [`CaptureBody`], which
//! passes every frame through untouched and keeps a copy of the data. The
//! status and a snapshot of the headers are taken when the response head is
//! produced; once the wrapped body reaches end-of-stream the accumulated
//! exchange is handed to a completion callback, exactly once. A body error or
//! an early drop (client went away) never fires the callback.

use crate::cassette::{HeaderMapping, RecordedResponse};
use bytes::BytesMut;
use hyper::body::{Body, Bytes, Frame, SizeHint};
use hyper::{HeaderMap, Response, StatusCode};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

/// Status, headers and body of a response that finished streaming.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CapturedResponse {
    pub fn into_recorded(self) -> RecordedResponse {
        RecordedResponse {
            status: self.status.as_u16(),
            headers: HeaderMapping::from_header_map(&self.headers),
            body: self.body,
        }
    }
}

type OnComplete = Box<dyn FnOnce(CapturedResponse) + Send + Sync>;

/// Body decorator that mirrors every data frame into a side buffer.
pub struct CaptureBody<B> {
    inner: B,
    status: StatusCode,
    headers: HeaderMap,
    buffer: BytesMut,
    on_complete: Option<OnComplete>,
}

impl<B> CaptureBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    fn new(inner: B, status: StatusCode, headers: HeaderMap, on_complete: OnComplete) -> Self {
        let mut body = Self {
            inner,
            status,
            headers,
            buffer: BytesMut::new(),
            on_complete: Some(on_complete),
        };
        // An empty body may never be polled by the connection.
        if body.inner.is_end_stream() {
            body.complete();
        }
        body
    }

    fn complete(&mut self) {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(CapturedResponse {
                status: self.status,
                headers: self.headers.clone(),
                body: std::mem::take(&mut self.buffer).freeze(),
            });
        }
    }
}

impl<B> Body for CaptureBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    this.buffer.extend_from_slice(data);
                }
                if this.inner.is_end_stream() {
                    this.complete();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(e)) => {
                this.on_complete = None;
                Poll::Ready(Some(Err(e)))
            }
            None => {
                this.complete();
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Wrap `response` so its exchange is reported to `on_complete` when fully streamed.
pub fn capture_response<B, F>(response: Response<B>, on_complete: F) -> Response<CaptureBody<B>>
where
    B: Body<Data = Bytes> + Unpin,
    F: FnOnce(CapturedResponse) + Send + Sync + 'static,
{
    let (parts, body) = response.into_parts();
    let body = CaptureBody::new(
        body,
        parts.status,
        parts.headers.clone(),
        Box::new(on_complete),
    );
    Response::from_parts(parts, body)
}
