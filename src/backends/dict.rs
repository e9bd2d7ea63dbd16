use crate::datastore::{next_datastore_id, Datastore, DatastoreId};
use crate::error::{Error, Result};
use crate::key::Key;
use crate::metadata::{Accuracy, DatastoreMetadata};
use crate::stream::{ByteStream, Source};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// An in-memory datastore, organized as a two-level map: namespace
/// (`key.path()`) → key → value. The namespace layer exists purely so
/// deleting the last key in a namespace can drop the (now-empty) namespace
/// entry rather than accumulate garbage.
pub struct DictDatastore {
    id: DatastoreId,
    namespaces: RwLock<HashMap<String, HashMap<Key, Bytes>>>,
}

impl DictDatastore {
    pub fn new() -> DictDatastore {
        DictDatastore {
            id: next_datastore_id(),
            namespaces: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for DictDatastore {
    fn default() -> Self {
        DictDatastore::new()
    }
}

#[async_trait]
impl Datastore for DictDatastore {
    fn id(&self) -> DatastoreId {
        self.id
    }

    async fn get(&self, key: &Key) -> Result<ByteStream> {
        let namespaces = self.namespaces.read().await;
        let bytes = namespaces
            .get(key.path())
            .and_then(|ns| ns.get(key))
            .cloned()
            .ok_or(Error::NotFound)?;
        Ok(ByteStream::from_source(Source::Buffer(bytes)))
    }

    async fn put_canonical(&self, key: &Key, stream: ByteStream) -> Result<()> {
        let bytes = stream.collect().await?;
        tracing::trace!(%key, size = bytes.len(), "put");
        let mut namespaces = self.namespaces.write().await;
        namespaces
            .entry(key.path().to_string())
            .or_default()
            .insert(key.clone(), bytes);
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        let mut namespaces = self.namespaces.write().await;
        let Some(ns) = namespaces.get_mut(key.path()) else {
            return Err(Error::NotFound);
        };
        if ns.remove(key).is_none() {
            return Err(Error::NotFound);
        }
        if ns.is_empty() {
            tracing::trace!(namespace = key.path(), "namespace emptied, dropping entry");
            namespaces.remove(key.path());
        }
        Ok(())
    }

    async fn contains(&self, key: &Key) -> Result<bool> {
        let namespaces = self.namespaces.read().await;
        Ok(namespaces
            .get(key.path())
            .map(|ns| ns.contains_key(key))
            .unwrap_or(false))
    }

    async fn datastore_stats(
        &self,
        selector: Option<&Key>,
        seen: &mut HashSet<DatastoreId>,
    ) -> Result<DatastoreMetadata> {
        if !seen.insert(self.id) {
            return Ok(DatastoreMetadata::Ignore);
        }

        let namespaces = self.namespaces.read().await;
        let mut size = 0u64;
        let mut object_count = 0u64;
        for (ns_path, ns) in namespaces.iter() {
            if let Some(sel) = selector {
                if !sel.is_ancestor_of(&Key::new(ns_path.clone())) && sel.as_str() != ns_path {
                    continue;
                }
            }
            for bytes in ns.values() {
                size += bytes.len() as u64;
                object_count += 1;
            }
        }
        Ok(DatastoreMetadata::Value {
            size: Some(size),
            size_accuracy: Accuracy::Exact,
            object_count: Some(object_count),
            access_allowed: Some(true),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{datastore_conformance, empty_chunk_transparency};

    #[tokio::test]
    async fn conformance() {
        let ds = DictDatastore::new();
        datastore_conformance(&ds).await;
    }

    #[tokio::test]
    async fn empty_chunks_do_not_affect_stored_value() {
        let ds = DictDatastore::new();
        empty_chunk_transparency(&ds).await;
    }

    #[tokio::test]
    async fn namespace_is_cleaned_up_after_last_delete() {
        let ds = DictDatastore::new();
        let a = Key::new("/ns/a");
        let b = Key::new("/ns/b");
        ds.put(&a, Source::Buffer(Bytes::from_static(b"1"))).await.unwrap();
        ds.put(&b, Source::Buffer(Bytes::from_static(b"2"))).await.unwrap();

        ds.delete(&a).await.unwrap();
        assert!(ds.namespaces.read().await.contains_key("/ns"));

        ds.delete(&b).await.unwrap();
        assert!(!ds.namespaces.read().await.contains_key("/ns"));
    }

    #[tokio::test]
    async fn stats_report_exact_accuracy() {
        let ds = DictDatastore::new();
        ds.put(&Key::new("/a"), Source::Buffer(Bytes::from_static(b"abcd")))
            .await
            .unwrap();
        ds.put(&Key::new("/b"), Source::Buffer(Bytes::from_static(b"xy")))
            .await
            .unwrap();

        let mut seen = HashSet::new();
        let stats = ds.datastore_stats(None, &mut seen).await.unwrap();
        let DatastoreMetadata::Value { size, size_accuracy, object_count, .. } = stats else {
            unreachable!()
        };
        assert_eq!(size, Some(6));
        assert_eq!(object_count, Some(2));
        assert_eq!(size_accuracy, Accuracy::Exact);
    }
}
