//! In-memory [`KeyValueStore`] for testing.

use crate::KeyValueStore;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// In-memory store that counts writes.
///
/// ```
/// use folio_state::{KeyValueStore, MemoryStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::with_values([("packagesSelected", "{}")]);
/// assert_eq!(store.get("packagesSelected").await.unwrap().as_deref(), Some("{}"));
/// assert_eq!(store.write_count(), 0);
/// # }
/// ```
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn with_values(values: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        let values = values.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self { values: RwLock::new(values), writes: AtomicUsize::new(0) }
    }

    /// Number of [`set`](KeyValueStore::set) calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.values.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
