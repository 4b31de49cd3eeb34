//! Tier 1: an in-process memo cache for expensive pure functions.
//!
//! Entries live until [`MemoCache::reset`] is called, which should happen whenever the data
//! behind them changes upstream.
use anyhow::Result;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A stable hash of an operation name and its arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoKey([u8; 32]);

impl MemoKey {
    /// Hash `operation` together with the JSON form of `args`.
    ///
    /// The hash depends only on the values, so equal arguments give equal keys across processes.
    pub fn new<A: Serialize + ?Sized>(operation: &str, args: &A) -> Result<Self> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(operation.as_bytes());
        hasher.update(&[0]);
        hasher.update(&serde_json::to_vec(args)?);

        Ok(Self(*hasher.finalize().as_bytes()))
    }
}

type Entry = Arc<dyn Any + Send + Sync>;

/// A thread-safe map from [`MemoKey`]s to shared values of any type
#[derive(Default)]
pub struct MemoCache {
    entries: Mutex<HashMap<MemoKey, Entry>>,
}

impl std::fmt::Debug for MemoCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoCache")
            .field("len", &self.len())
            .finish()
    }
}

impl MemoCache {
    /// A poisoned lock only means another thread panicked mid-insert; the map is still valid
    fn lock(&self) -> MutexGuard<'_, HashMap<MemoKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a value, returning `None` if missing or stored with a different type
    pub fn get<T: Any + Send + Sync>(&self, key: &MemoKey) -> Option<Arc<T>> {
        let entry = self.lock().get(key).cloned()?;
        entry.downcast::<T>().ok()
    }

    /// Store a value
    pub fn insert<T: Any + Send + Sync>(&self, key: MemoKey, value: Arc<T>) {
        self.lock().insert(key, value);
    }

    /// Drop every entry
    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
