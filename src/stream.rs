//! The canonical byte stream and the source normalizers that build one
//! from any of the accepted input shapes.

use crate::error::{Error, Result};
use crate::metadata::StreamMetadata;
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Any of the shapes a caller may hand in as a byte-producing value.
///
/// `NativeStream` and `AsyncIter` end up with the same Rust representation
/// (a boxed `Stream<Item = Bytes>`) — the distinction is kept only so each
/// has its own constructor for the caller's input shape.
pub enum Source {
    /// Already a canonical stream; passed through unchanged.
    Canonical(ByteStream),
    /// A stream native to this crate's own vocabulary.
    NativeStream(BoxStream<'static, Bytes>),
    /// An arbitrary externally-defined async iterable.
    AsyncIter(BoxStream<'static, Bytes>),
    /// A single value that resolves asynchronously.
    Future(BoxFuture<'static, Bytes>),
    /// A synchronous iterable. The optional `u64` is a size hint, filled in
    /// by constructors that know the total length up front (e.g. a `Vec`).
    SyncIter(Box<dyn Iterator<Item = Bytes> + Send>, Option<u64>),
    /// A single in-memory buffer.
    Buffer(Bytes),
}

impl Source {
    pub fn from_vec(chunks: Vec<Bytes>) -> Source {
        let total: u64 = chunks.iter().map(|c| c.len() as u64).sum();
        Source::SyncIter(Box::new(chunks.into_iter()), Some(total))
    }
}

impl From<Bytes> for Source {
    fn from(b: Bytes) -> Self {
        Source::Buffer(b)
    }
}

impl From<Vec<u8>> for Source {
    fn from(b: Vec<u8>) -> Self {
        Source::Buffer(Bytes::from(b))
    }
}

enum InnerSource {
    Native(BoxStream<'static, Bytes>),
    Sync(Box<dyn Iterator<Item = Bytes> + Send>),
}

struct Inner {
    source: Option<InnerSource>,
    metadata: StreamMetadata,
    /// Bytes pulled from the source but not yet delivered, because the
    /// caller's `max_bytes` was smaller than the chunk the source produced.
    overflow: Bytes,
    closed: bool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !self.closed {
            tracing::trace!("ByteStream dropped without an explicit aclose()");
        }
    }
}

/// A canonical, chunked, asynchronous byte source carrying optional
/// metadata. Cheaply cloneable; clones share the same underlying position
/// (there is no independent-cursor semantics here — see [`crate::channel`]
/// for that).
#[derive(Clone)]
pub struct ByteStream {
    inner: Arc<Mutex<Inner>>,
}

impl ByteStream {
    /// Build a canonical stream from an already-known buffer. A convenience
    /// equivalent to `ByteStream::from_source(Source::Buffer(bytes))`.
    pub fn from_bytes(bytes: Bytes) -> ByteStream {
        ByteStream::from_source(Source::Buffer(bytes))
    }

    pub fn from_source(source: Source) -> ByteStream {
        match source {
            Source::Canonical(stream) => stream,
            Source::NativeStream(s) | Source::AsyncIter(s) => {
                ByteStream::wrap_native(s, StreamMetadata::default())
            }
            Source::Future(fut) => {
                ByteStream::wrap_native(futures::stream::once(fut).boxed(), StreamMetadata::default())
            }
            Source::SyncIter(it, size_hint) => ByteStream::wrap_sync(
                it,
                StreamMetadata {
                    size: size_hint,
                    ..Default::default()
                },
            ),
            Source::Buffer(b) => {
                let size = b.len() as u64;
                ByteStream::wrap_sync(
                    Box::new(std::iter::once(b)),
                    StreamMetadata {
                        size: Some(size),
                        ..Default::default()
                    },
                )
            }
        }
    }

    fn wrap_native(source: BoxStream<'static, Bytes>, metadata: StreamMetadata) -> ByteStream {
        ByteStream {
            inner: Arc::new(Mutex::new(Inner {
                source: Some(InnerSource::Native(source)),
                metadata,
                overflow: Bytes::new(),
                closed: false,
            })),
        }
    }

    fn wrap_sync(
        source: Box<dyn Iterator<Item = Bytes> + Send>,
        metadata: StreamMetadata,
    ) -> ByteStream {
        ByteStream {
            inner: Arc::new(Mutex::new(Inner {
                source: Some(InnerSource::Sync(source)),
                metadata,
                overflow: Bytes::new(),
                closed: false,
            })),
        }
    }

    pub async fn metadata(&self) -> StreamMetadata {
        self.inner.lock().await.metadata
    }

    /// Receive at most `max_bytes` (or as many as the source yields in one
    /// step, if `None`). An empty return means end-of-stream; this is not
    /// an error, and subsequent calls keep returning empty until `aclose`.
    pub async fn receive_some(&self, max_bytes: Option<usize>) -> Result<Bytes> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(Error::Closed);
        }

        if !inner.overflow.is_empty() {
            let take = max_bytes
                .map(|m| m.min(inner.overflow.len()))
                .unwrap_or(inner.overflow.len());
            return Ok(inner.overflow.split_to(take));
        }

        loop {
            let next = match inner.source.as_mut() {
                None => return Ok(Bytes::new()),
                Some(InnerSource::Native(s)) => s.next().await,
                Some(InnerSource::Sync(it)) => it.next(),
            };

            match next {
                None => {
                    inner.source = None;
                    return Ok(Bytes::new());
                }
                // Empty chunks carry no end-of-stream meaning; skip them.
                Some(chunk) if chunk.is_empty() => continue,
                Some(chunk) => {
                    if let Some(max) = max_bytes {
                        if chunk.len() > max {
                            let mut chunk = chunk;
                            let head = chunk.split_to(max);
                            inner.overflow = chunk;
                            return Ok(head);
                        }
                    }
                    return Ok(chunk);
                }
            }
        }
    }

    /// Drain to end, returning the concatenation, and close regardless of
    /// whether draining succeeded.
    pub async fn collect(&self) -> Result<Bytes> {
        let hint = self.inner.lock().await.metadata.size.map(|s| s as usize);
        let result: Result<Bytes> = async {
            let mut buf = BytesMut::new();
            loop {
                let chunk = self.receive_some(hint).await?;
                if chunk.is_empty() {
                    break;
                }
                buf.extend_from_slice(&chunk);
            }
            Ok(buf.freeze())
        }
        .await;

        match (result, self.aclose().await) {
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Ok(bytes), Ok(())) => Ok(bytes),
        }
    }

    /// Idempotent; releases the underlying source.
    pub async fn aclose(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.source = None;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn roundtrip_buffer() {
        let s = ByteStream::from_source(Source::Buffer(Bytes::from_static(b"hello world")));
        assert_eq!(s.collect().await.unwrap(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn empty_chunks_are_not_end_of_stream() {
        let chunks = vec![Bytes::from_static(b"a"), Bytes::new(), Bytes::from_static(b"b")];
        let s = ByteStream::from_source(Source::from_vec(chunks));
        assert_eq!(s.collect().await.unwrap(), Bytes::from_static(b"ab"));
    }

    #[tokio::test]
    async fn receive_some_respects_max_bytes_and_buffers_overflow() {
        let s = ByteStream::from_source(Source::Buffer(Bytes::from_static(b"abcdef")));
        let first = s.receive_some(Some(2)).await.unwrap();
        assert_eq!(first, Bytes::from_static(b"ab"));
        let second = s.receive_some(Some(10)).await.unwrap();
        assert_eq!(second, Bytes::from_static(b"cdef"));
        let third = s.receive_some(None).await.unwrap();
        assert!(third.is_empty());
    }

    #[tokio::test]
    async fn repeated_receive_at_natural_end_stays_empty() {
        let s = ByteStream::from_source(Source::Buffer(Bytes::from_static(b"x")));
        assert_eq!(s.receive_some(None).await.unwrap(), Bytes::from_static(b"x"));
        assert!(s.receive_some(None).await.unwrap().is_empty());
        assert!(s.receive_some(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_stream_errors() {
        let s = ByteStream::from_source(Source::Buffer(Bytes::from_static(b"x")));
        s.aclose().await.unwrap();
        assert!(matches!(s.receive_some(None).await, Err(Error::Closed)));
        // idempotent
        s.aclose().await.unwrap();
    }

    #[tokio::test]
    async fn native_async_stream_shape() {
        let items = vec![Bytes::from_static(b"foo"), Bytes::from_static(b"bar")];
        let stream = futures::stream::iter(items).boxed();
        let s = ByteStream::from_source(Source::AsyncIter(stream));
        assert_eq!(s.collect().await.unwrap(), Bytes::from_static(b"foobar"));
    }

    #[tokio::test]
    async fn future_shape_yields_once() {
        let fut = Box::pin(async { Bytes::from_static(b"one-shot") });
        let s = ByteStream::from_source(Source::Future(fut));
        assert_eq!(s.collect().await.unwrap(), Bytes::from_static(b"one-shot"));
    }

    #[tokio::test]
    async fn canonical_passthrough_is_not_double_wrapped() {
        let s = ByteStream::from_source(Source::Buffer(Bytes::from_static(b"z")));
        let same = ByteStream::from_source(Source::Canonical(s.clone()));
        assert!(Arc::ptr_eq(&s.inner, &same.inner));
    }
}
