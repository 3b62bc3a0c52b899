use core::pin::Pin;
use core::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::ready;
use futures::stream::Stream;
use pin_project::pin_project;

/// Turn a stream of arbitrarily sized [`bytes::Bytes`] into a stream of fixed-size chunks.
///
/// Every item except possibly the last is exactly `chunk_size` bytes long. Errors from the
/// underlying stream are forwarded as soon as they are seen; bytes already buffered at that point
/// are not emitted.
#[pin_project]
pub struct ChunkedBody<S> {
    #[pin]
    body: S,
    buffer: BytesMut,
    chunk_size: usize,
    exhausted: bool,
}

impl<S> ChunkedBody<S> {
    pub fn new(body: S, chunk_size: usize) -> ChunkedBody<S> {
        let chunk_size = chunk_size.max(1);
        ChunkedBody {
            body,
            buffer: BytesMut::with_capacity(chunk_size),
            chunk_size,
            exhausted: false,
        }
    }
}

impl<S, E> Stream for ChunkedBody<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
{
    type Item = std::result::Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if this.buffer.len() >= *this.chunk_size {
                let chunk = this.buffer.split_to(*this.chunk_size);
                return Poll::Ready(Some(Ok(chunk.freeze())));
            }
            if *this.exhausted {
                if this.buffer.is_empty() {
                    return Poll::Ready(None);
                }
                return Poll::Ready(Some(Ok(this.buffer.split().freeze())));
            }
            match ready!(this.body.as_mut().poll_next(cx)) {
                Some(Ok(bytes)) => this.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                None => *this.exhausted = true,
            }
        }
    }
}
