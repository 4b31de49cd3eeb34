//! Tier 3: the full common reference dataset as one compressed object.
//!
//! The blob is fetched at most once per process and then held in memory. Requests for a subset
//! of journals are filtered from it by the caller.
use super::object_store::ObjectStore;
use crate::reference::ReferenceData;
use anyhow::{Context, Result, anyhow};
use log::info;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Object key for the common data blob
pub const COMMON_DATA_KEY: &str = "common_reference_data.json.lz4";

/// Compress and upload the full reference dataset
pub async fn publish(object_store: &dyn ObjectStore, data: &ReferenceData) -> Result<()> {
    let json = serde_json::to_vec(data)?;
    let compressed = lz4_flex::compress_prepend_size(&json);
    info!(
        "Publishing common data blob for {} journals ({} bytes)",
        data.issns().len(),
        compressed.len()
    );

    object_store.put(COMMON_DATA_KEY, compressed).await
}

fn decode(compressed: &[u8]) -> Result<ReferenceData> {
    let json = lz4_flex::decompress_size_prepended(compressed)
        .map_err(|err| anyhow!("Corrupt common data blob: {err}"))?;

    serde_json::from_slice(&json).context("Invalid common data blob")
}

/// The common data blob, loaded lazily from object storage
pub struct CommonDataBlob {
    object_store: Arc<dyn ObjectStore>,
    data: OnceCell<Option<Arc<ReferenceData>>>,
}

impl std::fmt::Debug for CommonDataBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommonDataBlob")
            .field("loaded", &self.data.initialized())
            .finish()
    }
}

impl CommonDataBlob {
    /// A blob to be read from `object_store`
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self {
            object_store,
            data: OnceCell::new(),
        }
    }

    /// The dataset, or `None` if no blob has been published.
    ///
    /// A failed fetch is not remembered, so the next call tries again.
    pub async fn get(&self) -> Result<Option<Arc<ReferenceData>>> {
        let data = self
            .data
            .get_or_try_init(|| async {
                let Some(compressed) = self.object_store.get(COMMON_DATA_KEY).await? else {
                    return Ok::<_, anyhow::Error>(None);
                };
                let data = decode(&compressed)?;
                info!("Loaded common data blob for {} journals", data.issns().len());

                Ok(Some(Arc::new(data)))
            })
            .await?;

        Ok(data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::object_store::LocalObjectStore;
    use crate::fixture::reference_data;
    use rstest::rstest;
    use tempfile::tempdir;

    #[rstest]
    #[tokio::test]
    async fn test_publish_and_get(reference_data: ReferenceData) {
        let dir = tempdir().unwrap();
        let objects = Arc::new(LocalObjectStore::new(dir.path()));
        publish(&*objects, &reference_data).await.unwrap();

        let blob = CommonDataBlob::new(objects);
        let loaded = blob.get().await.unwrap().unwrap();
        assert_eq!(*loaded, reference_data);

        // Second call is served from memory
        let again = blob.get().await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&loaded, &again));
    }

    #[tokio::test]
    async fn test_get_unpublished() {
        let dir = tempdir().unwrap();
        let blob = CommonDataBlob::new(Arc::new(LocalObjectStore::new(dir.path())));
        assert!(blob.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_blob() {
        let dir = tempdir().unwrap();
        let objects = Arc::new(LocalObjectStore::new(dir.path()));
        objects.put(COMMON_DATA_KEY, vec![1, 2]).await.unwrap();
        assert!(CommonDataBlob::new(objects).get().await.is_err());
    }
}
