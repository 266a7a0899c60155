//! A size-bounded write-through shim over a response body.
//!
//! Every frame is forwarded to the caller exactly as it arrived; a side
//! buffer mirrors data frames up to a configured maximum and is discarded
//! (without affecting forwarding) on overflow or explicit
//! [`disable_buffering`](BufferingBody::disable_buffering).
//!
//! When the wrapped stream ends normally *and* buffering was never disabled,
//! an optional finalize callback is invoked with a snapshot of the buffered
//! bytes; its future is driven to completion as part of this body's own
//! polling, so stream completion is observed exactly once there is nothing
//! left to store. If the stream is dropped before reaching its end (request
//! cancellation), the callback is simply never built: a partially buffered
//! body is never persisted.

use {
    bytes::{Bytes, BytesMut},
    http_body::{Body, Frame, SizeHint},
    pin_project_lite::pin_project,
    std::{
        future::Future,
        pin::Pin,
        task::{Context, Poll},
    },
};

/// A boxed future performing the store write once a body has been fully
/// buffered.
pub type FinalizeFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Builds the [`FinalizeFuture`] from the final buffered snapshot. Only
/// invoked if the stream completes ordinarily with buffering still enabled.
pub type FinalizeBuilder = Box<dyn FnOnce(Bytes) -> FinalizeFuture + Send>;

enum FinalizeState {
    Pending(FinalizeBuilder),
    Running(FinalizeFuture),
    Done,
}

pin_project! {
    pub struct BufferingBody<B> {
        #[pin]
        inner: B,
        buffer: Option<BytesMut>,
        maximum: usize,
        finalize: FinalizeState,
    }
}

impl<B> BufferingBody<B> {
    /// Wraps `inner`. `finalize` is called with the buffered snapshot once
    /// the stream ends, provided buffering was never disabled; pass `None`
    /// when the response was already decided not to be cacheable (equivalent
    /// to calling [`disable_buffering`](Self::disable_buffering) up front,
    /// but without even allocating a buffer).
    pub fn new(inner: B, maximum: usize, finalize: Option<FinalizeBuilder>) -> Self {
        Self {
            inner,
            buffer: finalize.is_some().then(BytesMut::new),
            maximum,
            finalize: match finalize {
                Some(builder) => FinalizeState::Pending(builder),
                None => FinalizeState::Done,
            },
        }
    }

    /// Disables buffering for the rest of this response. Previously buffered
    /// bytes are discarded; forwarding is unaffected.
    pub fn disable_buffering(&mut self) {
        self.buffer = None;
    }

    pub fn is_buffering_enabled(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.as_ref().map_or(0, BytesMut::len)
    }

    /// A copy of the buffered prefix so far.
    pub fn snapshot(&self) -> Bytes {
        self.buffer.as_ref().map_or_else(Bytes::new, |buffer| Bytes::copy_from_slice(buffer))
    }
}

impl<B> Body for BufferingBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        if let FinalizeState::Running(future) = this.finalize {
            return match future.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    *this.finalize = FinalizeState::Done;
                    Poll::Ready(None)
                }
                Poll::Pending => Poll::Pending,
            };
        }

        match this.inner.as_mut().poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(buffer) = this.buffer.as_mut() {
                    match frame.data_ref() {
                        Some(data) if buffer.len() + data.len() <= *this.maximum => {
                            buffer.extend_from_slice(data);
                        }
                        Some(_) => *this.buffer = None,
                        None => {}
                    }
                }
                Poll::Ready(Some(Ok(frame)))
            }

            Poll::Ready(Some(Err(error))) => {
                // The stream did not end ordinarily: skip finalization entirely.
                *this.finalize = FinalizeState::Done;
                Poll::Ready(Some(Err(error)))
            }

            Poll::Ready(None) => {
                let buffer = this.buffer.take();
                let pending = std::mem::replace(this.finalize, FinalizeState::Done);
                match (buffer, pending) {
                    (Some(buffer), FinalizeState::Pending(build)) => {
                        let mut future = build(buffer.freeze());
                        match future.as_mut().poll(cx) {
                            Poll::Ready(()) => Poll::Ready(None),
                            Poll::Pending => {
                                *this.finalize = FinalizeState::Running(future);
                                Poll::Pending
                            }
                        }
                    }
                    _ => Poll::Ready(None),
                }
            }

            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.finalize, FinalizeState::Done) && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

pin_project! {
    /// The response body type returned by [`CacheService`](crate::CacheService):
    /// a response served directly from the cache (or a conditional `304`/
    /// `only-if-cached` `504`), an upstream response already decided
    /// uncacheable, or an upstream response wrapped in a [`BufferingBody`].
    #[project = CacheBodyProj]
    pub enum CacheBody<B> {
        Cached {
            #[pin]
            body: http_body_util::Full<Bytes>,
        },
        Passthrough {
            #[pin]
            body: B,
        },
        Buffering {
            #[pin]
            body: BufferingBody<B>,
        },
    }
}

impl<B> CacheBody<B> {
    pub fn cached(body: Bytes) -> Self {
        Self::Cached { body: http_body_util::Full::new(body) }
    }

    pub fn passthrough(body: B) -> Self {
        Self::Passthrough { body }
    }

    pub fn buffering(body: BufferingBody<B>) -> Self {
        Self::Buffering { body }
    }
}

impl<B> Body for CacheBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            CacheBodyProj::Cached { body } => body.poll_frame(cx).map(|option| {
                option.map(|result| result.map_err(|never: std::convert::Infallible| match never {}))
            }),
            CacheBodyProj::Passthrough { body } => body.poll_frame(cx),
            CacheBodyProj::Buffering { body } => body.poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            Self::Cached { body } => body.is_end_stream(),
            Self::Passthrough { body } => body.is_end_stream(),
            Self::Buffering { body } => body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            Self::Cached { body } => body.size_hint(),
            Self::Passthrough { body } => body.size_hint(),
            Self::Buffering { body } => body.size_hint(),
        }
    }
}
