use crate::datastore::{next_datastore_id, Datastore, DatastoreId};
use crate::error::{Error, Result};
use crate::key::Key;
use crate::metadata::DatastoreMetadata;
use crate::stream::{ByteStream, Source};
use async_trait::async_trait;
use std::collections::HashSet;

/// A datastore that discards everything written to it and reports
/// everything as absent. Useful as a no-op leaf, and as a baseline to test
/// adapters against without needing real storage.
pub struct NullDatastore {
    id: DatastoreId,
}

impl NullDatastore {
    pub fn new() -> NullDatastore {
        NullDatastore {
            id: next_datastore_id(),
        }
    }
}

impl Default for NullDatastore {
    fn default() -> Self {
        NullDatastore::new()
    }
}

#[async_trait]
impl Datastore for NullDatastore {
    fn id(&self) -> DatastoreId {
        self.id
    }

    async fn get(&self, _key: &Key) -> Result<ByteStream> {
        Err(Error::NotFound)
    }

    async fn put_canonical(&self, _key: &Key, stream: ByteStream) -> Result<()> {
        // Still drain the input to completion, so a caller relying on
        // backpressure or on the input stream being fully consumed isn't
        // surprised by us discarding it early.
        stream.collect().await?;
        Ok(())
    }

    async fn delete(&self, _key: &Key) -> Result<()> {
        Err(Error::NotFound)
    }

    async fn contains(&self, _key: &Key) -> Result<bool> {
        Ok(false)
    }

    async fn datastore_stats(
        &self,
        _selector: Option<&Key>,
        seen: &mut HashSet<DatastoreId>,
    ) -> Result<DatastoreMetadata> {
        if !seen.insert(self.id) {
            return Ok(DatastoreMetadata::Ignore);
        }
        Ok(DatastoreMetadata::empty())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn get_and_delete_are_always_not_found() {
        let ds = NullDatastore::new();
        let key = Key::new("/anything");
        assert!(matches!(ds.get(&key).await, Err(Error::NotFound)));
        assert!(matches!(ds.delete(&key).await, Err(Error::NotFound)));
        assert!(!ds.contains(&key).await.unwrap());
    }

    #[tokio::test]
    async fn put_discards_but_drains_input() {
        let ds = NullDatastore::new();
        ds.put(&Key::new("/k"), Source::Buffer(Bytes::from_static(b"data")))
            .await
            .unwrap();
        assert!(!ds.contains(&Key::new("/k")).await.unwrap());
    }
}
