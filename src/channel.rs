//! The canonical object channel and its source normalizers.
//!
//! Mirrors [`crate::stream::ByteStream`] item-for-item, except that channels
//! support `clone`: every clone is an independent handle onto the same
//! shared, forward-only source, and the source is only actually torn down
//! once the last handle closes.

use crate::error::{Error, Result};
use crate::metadata::ChannelMetadata;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Any of the shapes a caller may hand in as an item-producing value.
pub enum ItemSource<T> {
    Canonical(Channel<T>),
    NativeStream(BoxStream<'static, T>),
    AsyncIter(BoxStream<'static, T>),
    Future(BoxFuture<'static, T>),
    SyncIter(Box<dyn Iterator<Item = T> + Send>, Option<u64>),
}

impl<T: Send + 'static> ItemSource<T> {
    pub fn from_vec(items: Vec<T>) -> ItemSource<T> {
        let count = items.len() as u64;
        ItemSource::SyncIter(Box::new(items.into_iter()), Some(count))
    }
}

enum State<T> {
    Open(Source<T>),
    Ended,
}

enum Source<T> {
    Native(BoxStream<'static, T>),
    Sync(Box<dyn Iterator<Item = T> + Send>),
}

struct Shared<T> {
    lock: Mutex<State<T>>,
    refcount: AtomicUsize,
    metadata: ChannelMetadata,
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        if matches!(self.lock.get_mut(), State::Open(_)) {
            tracing::trace!("Channel dropped without every clone calling aclose()");
        }
    }
}

/// A canonical, item-by-item asynchronous source carrying optional
/// metadata. Unlike [`crate::stream::ByteStream`], a `Channel` may be
/// [`Channel::clone`]d: the underlying source is closed only when every
/// clone has called [`Channel::aclose`].
pub struct Channel<T> {
    shared: Arc<Shared<T>>,
    /// Per-handle: whether *this* handle has already closed. Distinct from
    /// the shared refcount, so each clone's `aclose` is independently
    /// idempotent.
    closed: AtomicBool,
}

impl<T: Send + 'static> Channel<T> {
    pub fn from_source(source: ItemSource<T>) -> Channel<T> {
        match source {
            ItemSource::Canonical(chan) => chan,
            ItemSource::NativeStream(s) | ItemSource::AsyncIter(s) => {
                Channel::wrap(Source::Native(s), ChannelMetadata::default())
            }
            ItemSource::Future(fut) => Channel::wrap(
                Source::Native(futures::stream::once(fut).boxed()),
                ChannelMetadata::default(),
            ),
            ItemSource::SyncIter(it, count_hint) => Channel::wrap(
                Source::Sync(it),
                ChannelMetadata {
                    count: count_hint,
                    ..Default::default()
                },
            ),
        }
    }

    fn wrap(source: Source<T>, metadata: ChannelMetadata) -> Channel<T> {
        Channel {
            shared: Arc::new(Shared {
                lock: Mutex::new(State::Open(source)),
                refcount: AtomicUsize::new(1),
                metadata,
            }),
            closed: AtomicBool::new(false),
        }
    }

    pub fn metadata(&self) -> ChannelMetadata {
        self.shared.metadata
    }

    /// Receive the next item, or `None` at end-of-channel.
    pub async fn receive(&self) -> Result<Option<T>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let mut state = self.shared.lock.lock().await;
        match &mut *state {
            State::Ended => Ok(None),
            State::Open(Source::Native(s)) => match s.next().await {
                Some(v) => Ok(Some(v)),
                None => {
                    *state = State::Ended;
                    Ok(None)
                }
            },
            State::Open(Source::Sync(it)) => match it.next() {
                Some(v) => Ok(Some(v)),
                None => {
                    *state = State::Ended;
                    Ok(None)
                }
            },
        }
    }

    /// Receive without suspending; fails with `WouldBlock` if no item is
    /// immediately available (always true for a native async source whose
    /// next value isn't already buffered).
    pub fn receive_nowait(&self) -> Result<Option<T>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let mut state = match self.shared.lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => return Err(Error::WouldBlock),
        };
        match &mut *state {
            State::Ended => Ok(None),
            State::Open(Source::Sync(it)) => match it.next() {
                Some(v) => Ok(Some(v)),
                None => {
                    *state = State::Ended;
                    Ok(None)
                }
            },
            State::Open(Source::Native(s)) => {
                use futures::FutureExt;
                match s.next().now_or_never() {
                    Some(Some(v)) => Ok(Some(v)),
                    Some(None) => {
                        *state = State::Ended;
                        Ok(None)
                    }
                    None => Err(Error::WouldBlock),
                }
            }
        }
    }

    /// Create a co-owning handle onto the same underlying source.
    pub fn clone(&self) -> Result<Channel<T>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        self.shared.refcount.fetch_add(1, Ordering::AcqRel);
        Ok(Channel {
            shared: self.shared.clone(),
            closed: AtomicBool::new(false),
        })
    }

    /// Idempotent per-handle. The underlying source is only actually closed
    /// once the last clone closes.
    pub async fn aclose(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if self.shared.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            let mut state = self.shared.lock.lock().await;
            *state = State::Ended;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn roundtrip_sync_iter() {
        let c = Channel::from_source(ItemSource::from_vec(vec![1, 2, 3]));
        assert_eq!(c.receive().await.unwrap(), Some(1));
        assert_eq!(c.receive().await.unwrap(), Some(2));
        assert_eq!(c.receive().await.unwrap(), Some(3));
        assert_eq!(c.receive().await.unwrap(), None);
        assert_eq!(c.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn clone_shares_forward_only_source() {
        let c = Channel::from_source(ItemSource::from_vec(vec![1, 2, 3, 4]));
        let clone = c.clone().unwrap();
        assert_eq!(c.receive().await.unwrap(), Some(1));
        assert_eq!(clone.receive().await.unwrap(), Some(2));
        assert_eq!(c.receive().await.unwrap(), Some(3));
        assert_eq!(clone.receive().await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn closed_handle_errors_but_other_clone_survives() {
        let c = Channel::from_source(ItemSource::from_vec(vec![1, 2]));
        let clone = c.clone().unwrap();
        c.aclose().await.unwrap();
        assert!(matches!(c.receive().await, Err(Error::Closed)));
        assert_eq!(clone.receive().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn receive_nowait_would_block_on_native_stream() {
        let stream = futures::stream::pending::<i32>().boxed();
        let c = Channel::from_source(ItemSource::NativeStream(stream));
        assert!(matches!(c.receive_nowait(), Err(Error::WouldBlock)));
    }
}
