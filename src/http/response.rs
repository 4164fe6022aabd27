//! Response handling.
//!
//! # Responsibilities
//! - Relay backend response bodies without buffering
//! - Report when a relayed body is finished, and how many bytes it carried
//!
//! A proxied request is not over when the response head arrives. The
//! backend stays busy until the body has been streamed, so per-request
//! bookkeeping (latency, in-flight count) runs from [`ObservedBody`]'s
//! completion hook rather than from the handler.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use axum::body::Body;
use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};

/// How a relayed body ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEnd {
    /// The backend sent the whole body.
    Complete,
    /// Reading from the backend failed mid-stream.
    Error,
    /// The body was dropped before the end, usually a client disconnect.
    Aborted,
}

/// What an [`ObservedBody`] reports on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodySummary {
    pub bytes: u64,
    pub end: BodyEnd,
}

type Completion = Box<dyn FnOnce(BodySummary) + Send + 'static>;

/// A response body that counts data bytes and fires a completion hook
/// exactly once: at end of stream, on error, or when dropped.
pub struct ObservedBody {
    inner: Body,
    bytes: u64,
    on_complete: Option<Completion>,
}

impl ObservedBody {
    pub fn new<F>(inner: Body, on_complete: F) -> Self
    where
        F: FnOnce(BodySummary) + Send + 'static,
    {
        Self {
            inner,
            bytes: 0,
            on_complete: Some(Box::new(on_complete)),
        }
    }

    fn finish(&mut self, end: BodyEnd) {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(BodySummary {
                bytes: self.bytes,
                end,
            });
        }
    }
}

impl fmt::Debug for ObservedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedBody")
            .field("bytes", &self.bytes)
            .field("finished", &self.on_complete.is_none())
            .finish()
    }
}

impl HttpBody for ObservedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.bytes += data.len() as u64;
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish(BodyEnd::Error);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish(BodyEnd::Complete);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for ObservedBody {
    fn drop(&mut self) {
        // An empty body may be dropped without ever being polled.
        let end = if self.inner.is_end_stream() {
            BodyEnd::Complete
        } else {
            BodyEnd::Aborted
        };
        self.finish(end);
    }
}
