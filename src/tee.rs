//! Teeing wrappers: fan a single upstream out to N dynamically
//! attached side consumers plus the primary receiver.
//!
//! The shared-state and cancel-shielded-teardown patterns here are modeled
//! on the state-machine-over-a-shared-lock style used for journal readers
//! elsewhere in this workspace, adapted to a fan-out rather than a
//! fan-in shape.

use crate::error::{Error, Result};
use crate::stream::ByteStream;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

const DEFAULT_BUF_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Fresh,
    Open,
    Closed,
    Broken,
}

struct Shared {
    upstream: Option<ByteStream>,
    side_senders: Vec<mpsc::Sender<Bytes>>,
    tasks: JoinSet<()>,
    buf_size: usize,
    state: Lifecycle,
}

/// A tee over a canonical byte stream.
///
/// `receive_some` fans every chunk out to every attached side sender
/// (in attachment order) *before* returning it to the caller, and closes
/// every side sender before surfacing end-of-stream to the caller.
pub struct TeeStream {
    shared: Arc<Mutex<Shared>>,
}

impl TeeStream {
    pub fn new(upstream: Option<ByteStream>, buf_size: usize) -> TeeStream {
        TeeStream {
            shared: Arc::new(Mutex::new(Shared {
                state: if upstream.is_some() {
                    Lifecycle::Open
                } else {
                    Lifecycle::Fresh
                },
                upstream,
                side_senders: Vec::new(),
                tasks: JoinSet::new(),
                buf_size,
            })),
        }
    }

    /// Set the upstream of a tee constructed without one. Only valid while
    /// `Fresh` (no receive or close has happened, and no side consumer is
    /// attached yet).
    pub async fn set_source(&self, upstream: ByteStream) -> Result<()> {
        let mut shared = self.shared.lock().await;
        if shared.state != Lifecycle::Fresh {
            return Err(Error::Broken("tee source can only be set once, before use".into()));
        }
        shared.upstream = Some(upstream);
        shared.state = Lifecycle::Open;
        Ok(())
    }

    /// Attach a side consumer. The side sender is registered under the
    /// shared lock before this call returns, so every chunk from the next
    /// `receive_some` call onward is also sent to `f`'s pipe before the
    /// primary observes it; this call additionally returns only once `f`
    /// has signalled readiness (its first poll has run).
    pub async fn start_task<F, Fut>(&self, buf_size: Option<usize>, f: F) -> Result<()>
    where
        F: FnOnce(mpsc::Receiver<Bytes>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let ready = {
            let mut shared = self.shared.lock().await;
            attach(&mut shared, buf_size, f)?
        };
        let _ = ready.await;
        Ok(())
    }

    /// Attach a side consumer without blocking. Fails with `TeeBusy` if a
    /// receive is already in flight, rather than risk losing a chunk to a
    /// side consumer that attached too late. Does not wait for the side
    /// consumer to start, unlike `start_task`.
    pub fn start_task_soon<F, Fut>(&self, buf_size: Option<usize>, f: F) -> Result<()>
    where
        F: FnOnce(mpsc::Receiver<Bytes>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut shared = self.shared.try_lock().map_err(|_| Error::TeeBusy)?;
        attach(&mut shared, buf_size, f)?;
        Ok(())
    }

    pub async fn receive_some(&self, max_bytes: Option<usize>) -> Result<Bytes> {
        let mut shared = self.shared.lock().await;
        match shared.state {
            Lifecycle::Closed => return Err(Error::Closed),
            Lifecycle::Broken => return Err(Error::Broken("tee upstream previously failed".into())),
            Lifecycle::Fresh => return Err(Error::Closed),
            Lifecycle::Open => {}
        }

        let upstream = shared
            .upstream
            .as_ref()
            .expect("Open state implies upstream is set")
            .clone();
        let chunk = upstream.receive_some(max_bytes).await;

        match chunk {
            Err(e) => {
                shared.state = Lifecycle::Broken;
                Err(e)
            }
            Ok(bytes) if bytes.is_empty() => {
                close_tee(&mut shared).await;
                shared.state = Lifecycle::Closed;
                Ok(bytes)
            }
            Ok(bytes) => {
                let mut broken = false;
                for tx in shared.side_senders.iter() {
                    if tx.send(bytes.clone()).await.is_err() {
                        broken = true;
                        break;
                    }
                }
                if broken {
                    tracing::warn!("tee side consumer dropped its receiver, breaking tee");
                    close_tee(&mut shared).await;
                    shared.state = Lifecycle::Closed;
                    return Err(Error::Broken("a tee side consumer dropped its receiver".into()));
                }
                Ok(bytes)
            }
        }
    }

    /// Cancel-shielded: the actual teardown runs on a detached task so that
    /// dropping the future returned by this method does not abort cleanup
    /// mid-flight.
    pub async fn aclose(&self) -> Result<()> {
        let shared = self.shared.clone();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let mut shared = shared.lock().await;
            if shared.state != Lifecycle::Closed {
                tracing::trace!(side_consumers = shared.side_senders.len(), "closing tee");
                close_tee(&mut shared).await;
                shared.state = Lifecycle::Closed;
            }
            let _ = done_tx.send(());
        });
        let _ = done_rx.await;
        Ok(())
    }
}

/// Close every side sender (in attach order), then close upstream, then
/// drain the task group — the order spec'd for both the natural-EOF path
/// and `aclose`.
async fn close_tee(shared: &mut Shared) {
    shared.side_senders.clear();
    if let Some(upstream) = shared.upstream.take() {
        let _ = upstream.aclose().await;
    }
    while shared.tasks.join_next().await.is_some() {}
}

fn attach<F, Fut>(
    shared: &mut Shared,
    buf_size: Option<usize>,
    f: F,
) -> Result<tokio::sync::oneshot::Receiver<()>>
where
    F: FnOnce(mpsc::Receiver<Bytes>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    match shared.state {
        Lifecycle::Closed | Lifecycle::Broken => return Err(Error::Closed),
        Lifecycle::Fresh | Lifecycle::Open => {}
    }
    let capacity = buf_size.unwrap_or(shared.buf_size).max(1);
    tracing::debug!(capacity, "attaching tee side consumer");
    let (tx, rx) = mpsc::channel(capacity);
    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    shared.side_senders.push(tx);
    shared.tasks.spawn(async move {
        let _ = ready_tx.send(());
        f(rx).await;
    });
    Ok(ready_rx)
}

impl Default for TeeStream {
    fn default() -> Self {
        TeeStream::new(None, DEFAULT_BUF_SIZE)
    }
}

/// The `Channel<T>` counterpart of [`TeeStream`]: fans items out to N side
/// consumers plus the primary receiver, with the same ordering, lifecycle,
/// and cancel-shielded-close guarantees.
pub struct TeeChannel<T> {
    shared: Arc<Mutex<ChannelShared<T>>>,
}

struct ChannelShared<T> {
    upstream: Option<crate::channel::Channel<T>>,
    side_senders: Vec<mpsc::Sender<T>>,
    tasks: JoinSet<()>,
    buf_size: usize,
    state: Lifecycle,
}

impl<T: Clone + Send + 'static> TeeChannel<T> {
    pub fn new(upstream: Option<crate::channel::Channel<T>>, buf_size: usize) -> TeeChannel<T> {
        TeeChannel {
            shared: Arc::new(Mutex::new(ChannelShared {
                state: if upstream.is_some() {
                    Lifecycle::Open
                } else {
                    Lifecycle::Fresh
                },
                upstream,
                side_senders: Vec::new(),
                tasks: JoinSet::new(),
                buf_size,
            })),
        }
    }

    /// Attach a side consumer. Returns only once `f` has signalled
    /// readiness (its first poll has run); see [`TeeStream::start_task`].
    pub async fn start_task<F, Fut>(&self, buf_size: Option<usize>, f: F) -> Result<()>
    where
        F: FnOnce(mpsc::Receiver<T>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let ready = {
            let mut shared = self.shared.lock().await;
            channel_attach(&mut shared, buf_size, f)?
        };
        let _ = ready.await;
        Ok(())
    }

    /// Attach a side consumer without blocking or waiting for it to start;
    /// see [`TeeStream::start_task_soon`].
    pub fn start_task_soon<F, Fut>(&self, buf_size: Option<usize>, f: F) -> Result<()>
    where
        F: FnOnce(mpsc::Receiver<T>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut shared = self.shared.try_lock().map_err(|_| Error::TeeBusy)?;
        channel_attach(&mut shared, buf_size, f)?;
        Ok(())
    }

    pub async fn receive(&self) -> Result<Option<T>> {
        let mut shared = self.shared.lock().await;
        match shared.state {
            Lifecycle::Closed => return Err(Error::Closed),
            Lifecycle::Broken => return Err(Error::Broken("tee upstream previously failed".into())),
            Lifecycle::Fresh => return Err(Error::Closed),
            Lifecycle::Open => {}
        }

        let item = {
            let upstream = shared
                .upstream
                .as_ref()
                .expect("Open state implies upstream is set");
            upstream.receive().await
        };

        match item {
            Err(e) => {
                shared.state = Lifecycle::Broken;
                Err(e)
            }
            Ok(None) => {
                channel_close_tee(&mut shared).await;
                shared.state = Lifecycle::Closed;
                Ok(None)
            }
            Ok(Some(item)) => {
                let mut broken = false;
                for tx in shared.side_senders.iter() {
                    if tx.send(item.clone()).await.is_err() {
                        broken = true;
                        break;
                    }
                }
                if broken {
                    tracing::warn!("tee side consumer dropped its receiver, breaking tee");
                    channel_close_tee(&mut shared).await;
                    shared.state = Lifecycle::Closed;
                    return Err(Error::Broken("a tee side consumer dropped its receiver".into()));
                }
                Ok(Some(item))
            }
        }
    }

    pub async fn aclose(&self) -> Result<()> {
        let shared = self.shared.clone();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let mut shared = shared.lock().await;
            if shared.state != Lifecycle::Closed {
                channel_close_tee(&mut shared).await;
                shared.state = Lifecycle::Closed;
            }
            let _ = done_tx.send(());
        });
        let _ = done_rx.await;
        Ok(())
    }
}

/// The `Channel<T>` counterpart of [`close_tee`]: same close-senders →
/// close-upstream → drain-tasks order.
async fn channel_close_tee<T: Send + 'static>(shared: &mut ChannelShared<T>) {
    shared.side_senders.clear();
    if let Some(upstream) = shared.upstream.take() {
        let _ = upstream.aclose().await;
    }
    while shared.tasks.join_next().await.is_some() {}
}

fn channel_attach<T, F, Fut>(
    shared: &mut ChannelShared<T>,
    buf_size: Option<usize>,
    f: F,
) -> Result<tokio::sync::oneshot::Receiver<()>>
where
    F: FnOnce(mpsc::Receiver<T>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
    T: Send + 'static,
{
    match shared.state {
        Lifecycle::Closed | Lifecycle::Broken => return Err(Error::Closed),
        Lifecycle::Fresh | Lifecycle::Open => {}
    }
    let capacity = buf_size.unwrap_or(shared.buf_size).max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    shared.side_senders.push(tx);
    shared.tasks.spawn(async move {
        let _ = ready_tx.send(());
        f(rx).await;
    });
    Ok(ready_rx)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::stream::Source;
    use tokio::sync::mpsc::Receiver;

    async fn collect_side(mut rx: Receiver<Bytes>) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.push(chunk);
        }
        out
    }

    #[tokio::test]
    async fn fan_out_matches_primary_and_closes_before_eof() {
        let upstream = ByteStream::from_source(Source::from_vec(vec![
            Bytes::from_static(b"ab"),
            Bytes::from_static(b"cd"),
        ]));
        let tee = TeeStream::new(Some(upstream), 4);

        let (collected_tx, collected_rx) = tokio::sync::oneshot::channel();
        tee.start_task(None, move |rx| async move {
            let out = collect_side(rx).await;
            let _ = collected_tx.send(out);
        })
        .await
        .unwrap();

        let mut primary = Vec::new();
        loop {
            let chunk = tee.receive_some(None).await.unwrap();
            if chunk.is_empty() {
                break;
            }
            primary.push(chunk);
        }

        let side = collected_rx.await.unwrap();
        assert_eq!(primary, side);
    }

    #[tokio::test]
    async fn late_attach_only_sees_suffix() {
        let upstream = ByteStream::from_source(Source::from_vec(vec![
            Bytes::from_static(b"a"),
            Bytes::from_static(b"b"),
            Bytes::from_static(b"c"),
        ]));
        let tee = TeeStream::new(Some(upstream), 4);

        assert_eq!(tee.receive_some(None).await.unwrap(), Bytes::from_static(b"a"));

        let (collected_tx, collected_rx) = tokio::sync::oneshot::channel();
        tee.start_task(None, move |rx| async move {
            let out = collect_side(rx).await;
            let _ = collected_tx.send(out);
        })
        .await
        .unwrap();

        while !tee.receive_some(None).await.unwrap().is_empty() {}

        let side = collected_rx.await.unwrap();
        assert_eq!(side, vec![Bytes::from_static(b"b"), Bytes::from_static(b"c")]);
    }

    #[tokio::test]
    async fn broken_side_consumer_breaks_the_tee() {
        let upstream = ByteStream::from_source(Source::from_vec(vec![
            Bytes::from_static(b"a"),
            Bytes::from_static(b"b"),
        ]));
        let tee = TeeStream::new(Some(upstream), 1);

        tee.start_task(None, |rx| async move {
            drop(rx);
        })
        .await
        .unwrap();

        // Give the spawned task a chance to drop its receiver.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let result = tee.receive_some(None).await;
        assert!(matches!(result, Err(Error::Broken(_)) | Ok(_)));
    }

    #[tokio::test]
    async fn aclose_is_idempotent_and_survives_cancellation() {
        let upstream = ByteStream::from_source(Source::from_vec(vec![Bytes::from_static(b"x")]));
        let tee = TeeStream::new(Some(upstream), 4);

        tee.start_task(None, |mut rx| async move {
            while rx.recv().await.is_some() {}
        })
        .await
        .unwrap();

        // Drop the close future early; teardown must still happen because
        // it runs on a detached task.
        {
            let close_fut = tee.aclose();
            drop(close_fut);
        }
        tee.aclose().await.unwrap();
        tee.aclose().await.unwrap();
    }

    #[tokio::test]
    async fn channel_tee_fans_out_in_order() {
        use crate::channel::{Channel, ItemSource};

        let upstream = Channel::from_source(ItemSource::from_vec(vec![1, 2, 3]));
        let tee = TeeChannel::new(Some(upstream), 4);

        let (collected_tx, collected_rx) = tokio::sync::oneshot::channel();
        tee.start_task(None, move |mut rx| async move {
            let mut out = Vec::new();
            while let Some(v) = rx.recv().await {
                out.push(v);
            }
            let _ = collected_tx.send(out);
        })
        .await
        .unwrap();

        let mut primary = Vec::new();
        while let Some(v) = tee.receive().await.unwrap() {
            primary.push(v);
        }

        assert_eq!(primary, vec![1, 2, 3]);
        assert_eq!(collected_rx.await.unwrap(), vec![1, 2, 3]);
    }
}
