//! The adapter base: a pass-through datastore wrapping one child, with
//! forwarding flags and a cycle-safe stats walk.

use crate::datastore::{next_datastore_id, Datastore, DatastoreId};
use crate::error::{Error, Result};
use crate::key::Key;
use crate::metadata::{DatastoreMetadata, StreamMetadata};
use crate::stream::{ByteStream, Source};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Arc;

/// A datastore that forwards every operation to a single child, by
/// default deriving `contains`/`get_all`/`stat` from `get` rather than
/// forwarding them directly.
///
/// The child is held as an `Arc` rather than a `Box` so that the same
/// child can be mounted under more than one adapter at once — the DAG
/// topology `datastore_stats`'s cycle-safe walk exists to handle.
///
/// The safe defaults matter for adapters that transform stream contents
/// (encryption, compression, serialization): forwarding `stat`/`get_all`
/// naively to such a child would report the *transformed* size, not the
/// adapter's own. Adapters that don't transform content can opt into the
/// cheaper forwarding behavior with `with_forward_*`.
pub struct Adapter {
    id: DatastoreId,
    child: Arc<dyn Datastore>,
    forward_contains: bool,
    forward_get_all: bool,
    forward_stat: bool,
}

impl Adapter {
    pub fn new(child: Arc<dyn Datastore>) -> Adapter {
        Adapter {
            id: next_datastore_id(),
            child,
            forward_contains: false,
            forward_get_all: false,
            forward_stat: false,
        }
    }

    pub fn with_forward_contains(mut self, forward: bool) -> Self {
        self.forward_contains = forward;
        self
    }

    pub fn with_forward_get_all(mut self, forward: bool) -> Self {
        self.forward_get_all = forward;
        self
    }

    pub fn with_forward_stat(mut self, forward: bool) -> Self {
        self.forward_stat = forward;
        self
    }
}

#[async_trait]
impl Datastore for Adapter {
    fn id(&self) -> DatastoreId {
        self.id
    }

    async fn get(&self, key: &Key) -> Result<ByteStream> {
        self.child.get(key).await
    }

    async fn put(&self, key: &Key, value: Source) -> Result<()> {
        self.child.put(key, value).await
    }

    async fn put_canonical(&self, key: &Key, stream: ByteStream) -> Result<()> {
        self.child.put_canonical(key, stream).await
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.child.delete(key).await
    }

    async fn contains(&self, key: &Key) -> Result<bool> {
        if self.forward_contains {
            return self.child.contains(key).await;
        }
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
        if self.forward_get_all {
            return self.child.get_all(key).await;
        }
        self.get(key).await?.collect().await
    }

    async fn stat(&self, key: &Key) -> Result<StreamMetadata> {
        if self.forward_stat {
            return self.child.stat(key).await;
        }
        let stream = self.get(key).await?;
        let metadata = stream.metadata().await;
        stream.aclose().await?;
        Ok(metadata)
    }

    async fn datastore_stats(
        &self,
        selector: Option<&Key>,
        seen: &mut HashSet<DatastoreId>,
    ) -> Result<DatastoreMetadata> {
        if !seen.insert(self.id) {
            tracing::trace!(id = self.id, "datastore_stats: already visited, ignoring");
            return Ok(DatastoreMetadata::Ignore);
        }
        self.child.datastore_stats(selector, seen).await
    }

    async fn aclose(&self) -> Result<()> {
        // Close the child first; local teardown (none, for the base
        // adapter) always runs regardless of whether that succeeded.
        self.child.aclose().await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backends::DictDatastore;
    use crate::testing::datastore_conformance;

    #[tokio::test]
    async fn default_adapter_preserves_conformance() {
        let ds = Adapter::new(Arc::new(DictDatastore::new()));
        datastore_conformance(&ds).await;
    }

    #[tokio::test]
    async fn cycle_safe_stats_counts_shared_leaf_once() {
        // Two adapter chains mounting the *same* leaf — a DAG, not a tree.
        // The leaf's contribution must be counted exactly once.
        let leaf: Arc<dyn Datastore> = Arc::new(DictDatastore::new());
        leaf.put(&Key::new("/x"), Source::Buffer(Bytes::from_static(b"12345")))
            .await
            .unwrap();

        let branch_one = Adapter::new(leaf.clone());
        let branch_two = Adapter::new(leaf.clone());

        let mut seen = HashSet::new();
        let first = branch_one.datastore_stats(None, &mut seen).await.unwrap();
        let second = branch_two.datastore_stats(None, &mut seen).await.unwrap();

        assert!(matches!(first, DatastoreMetadata::Value { size: Some(5), .. }));
        assert!(matches!(second, DatastoreMetadata::Ignore));

        let total = first + second;
        assert!(matches!(total, DatastoreMetadata::Value { size: Some(5), .. }));
    }
}
