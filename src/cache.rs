//! The Multi-Tier Cache in front of the reference tables.
//!
//! Lookups try, in order: the in-process memo cache (tier 1), the common data blob (tier 3), the
//! local snapshot database (tier 2) and finally the primary store. The blob holds every journal,
//! so requests for a subset are filtered down after it is read. A failing tier is logged and skipped, so a cache problem costs latency rather than
//! failing the request.
use crate::reference::{IdentifierSet, ReferenceData};
use crate::store::Store;
use anyhow::Result;
use log::{debug, warn};
use std::sync::Arc;

pub mod blob;
pub mod memo;
pub mod object_store;
pub mod snapshot;

use blob::CommonDataBlob;
use memo::{MemoCache, MemoKey};
use snapshot::SnapshotDb;

/// Reference data access through every cache tier
#[derive(Debug)]
pub struct ReferenceCache {
    primary: Store,
    memo: MemoCache,
    snapshot: Option<SnapshotDb>,
    blob: Option<CommonDataBlob>,
}

impl ReferenceCache {
    /// A cache which only memoises results from the primary store
    pub fn new(primary: Store) -> Self {
        Self {
            primary,
            memo: MemoCache::default(),
            snapshot: None,
            blob: None,
        }
    }

    /// Read through a local snapshot database
    pub fn with_snapshot(mut self, snapshot: SnapshotDb) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Serve requests from the common data blob when one is published
    pub fn with_blob(mut self, blob: CommonDataBlob) -> Self {
        self.blob = Some(blob);
        self
    }

    /// Reference data for `ids`, memoised under `key` and the identifier set
    pub async fn get_common_package_data(
        &self,
        key: &str,
        ids: &IdentifierSet,
    ) -> Result<Arc<ReferenceData>> {
        let memo_key = MemoKey::new("get_common_package_data", &(key, ids))?;
        if let Some(data) = self.memo.get::<ReferenceData>(&memo_key) {
            debug!("Reference data for {key} served from memory");
            return Ok(data);
        }

        let data = self.load_uncached(ids).await?;
        self.memo.insert(memo_key, data.clone());

        Ok(data)
    }

    async fn load_uncached(&self, ids: &IdentifierSet) -> Result<Arc<ReferenceData>> {
        if let Some(blob) = &self.blob {
            match blob.get().await {
                Ok(Some(data)) => {
                    return Ok(match ids {
                        IdentifierSet::All => data,
                        IdentifierSet::Only(_) => Arc::new(data.restrict_to(ids)),
                    });
                }
                Ok(None) => debug!("No common data blob published"),
                Err(err) => warn!("Common data blob unavailable: {err:#}"),
            }
        }

        if let Some(snapshot) = &self.snapshot {
            let loaded = match snapshot.ensure_ready(&self.primary).await {
                Ok(()) => snapshot.load(ids).await,
                Err(err) => Err(err),
            };
            match loaded {
                Ok(data) => return Ok(Arc::new(data)),
                Err(err) => warn!("Reference snapshot unavailable, using primary store: {err:#}"),
            }
        }

        Ok(Arc::new(self.primary.reference_data(ids).await?))
    }

    /// Drop everything memoised in process memory.
    ///
    /// Call after the reference tables change upstream.
    pub fn reset(&self) {
        self.memo.reset();
    }
}
