//! The datastore contract: the abstract surface every backend and
//! adapter implements.

use crate::error::{Error, Result};
use crate::key::Key;
use crate::metadata::{DatastoreMetadata, StreamMetadata};
use crate::stream::{ByteStream, Source};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// A stable identifier handed out to every datastore/adapter at
/// construction, used in place of object identity (which Rust has no
/// stable, comparable handle for) by the cycle-safe stats walk.
pub type DatastoreId = u64;

pub fn next_datastore_id() -> DatastoreId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// The abstract key→binary-value datastore surface.
///
/// `contains`, `get_all`, and `stat` have default implementations derived
/// from `get`; backends override them only when they can do better than
/// "open, inspect, close".
#[async_trait]
pub trait Datastore: Send + Sync {
    /// A stable identity for this datastore instance, used by
    /// `datastore_stats` to detect DAGs/cycles in an adapter tree.
    fn id(&self) -> DatastoreId;

    async fn get(&self, key: &Key) -> Result<ByteStream>;

    /// Store `value`, accepting any of the five input shapes via `Source`.
    /// The default implementation normalizes `value` into a canonical
    /// `ByteStream` and hands it to [`Datastore::put_canonical`]; backends
    /// implement that instead of `put` directly so the normalization logic
    /// lives in one place rather than being re-derived per backend.
    async fn put(&self, key: &Key, value: Source) -> Result<()> {
        self.put_canonical(key, ByteStream::from_source(value)).await
    }

    /// Store an already-normalized stream. This is the method backends and
    /// adapters actually override; `put` is the caller-facing entry point.
    async fn put_canonical(&self, key: &Key, stream: ByteStream) -> Result<()>;

    async fn delete(&self, key: &Key) -> Result<()>;

    async fn contains(&self, key: &Key) -> Result<bool> {
        match self.get(key).await {
            Ok(stream) => {
                stream.aclose().await?;
                Ok(true)
            }
            Err(Error::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_all(&self, key: &Key) -> Result<Bytes> {
        self.get(key).await?.collect().await
    }

    async fn stat(&self, key: &Key) -> Result<StreamMetadata> {
        let stream = self.get(key).await?;
        let metadata = stream.metadata().await;
        stream.aclose().await?;
        Ok(metadata)
    }

    /// Aggregate size/usage metadata, optionally scoped to `selector`'s
    /// namespace. `seen` collects the stable ids of every datastore
    /// already visited on this walk so that a DAG (the same leaf mounted
    /// under two adapters) is counted exactly once.
    async fn datastore_stats(
        &self,
        selector: Option<&Key>,
        seen: &mut HashSet<DatastoreId>,
    ) -> Result<DatastoreMetadata> {
        let _ = selector;
        let _ = seen;
        Ok(DatastoreMetadata::empty())
    }

    async fn aclose(&self) -> Result<()> {
        Ok(())
    }
}
