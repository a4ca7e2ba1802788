//! Durable key-value state.
//!
//! A handful of values have to survive restarts: which packages the user
//! selected, when the library last checked the server for updates and which
//! export schema the local archives were downloaded with. They are stored as
//! plain strings under the [`keys`] below; callers own the encoding.
//!
//! [`SqliteStore`] is the production store. [`MemoryStore`] (behind the
//! `mock` feature) counts writes so tests can assert that a pass performed
//! none.

mod db;
pub mod error;
#[cfg(any(test, feature = "mock"))]
mod memory;
mod store;

pub use crate::db::Database;
#[cfg(any(test, feature = "mock"))]
pub use crate::memory::MemoryStore;
pub use crate::store::SqliteStore;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub mod keys {
    /// JSON object of package name to `true`.
    pub const PACKAGES_SELECTED: &str = "packagesSelected";
    /// RFC 3339 timestamp of the last check against the remote catalog.
    pub const LAST_UPDATE_CHECK: &str = "lastUpdateCheck";
    /// Export schema version the local archives were downloaded with.
    pub const LAST_UPDATE_SCHEMA: &str = "lastUpdateSchema";
}

/// String-keyed durable storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Stored value, or `None` if the key was never set.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Create or replace the value stored under `key`.
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

pub type StoreHandle = Arc<dyn KeyValueStore + Send + Sync>;
