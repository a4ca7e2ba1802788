//! Client for the remote catalog.
//!
//! The server publishes a static export directory per schema version (the
//! package manifest and the per-document "last updated" manifest) plus a
//! bundle endpoint that zips up an arbitrary set of document archives on
//! demand. [`CatalogClient`] is the seam the sync engine talks to;
//! [`HttpCatalog`] is the real implementation and `MockCatalog` (behind the
//! `mock` feature) a scriptable one for tests.

pub mod error;
mod http;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod models;

pub use crate::http::HttpCatalog;
#[cfg(any(test, feature = "mock"))]
pub use crate::mock::MockCatalog;
pub use crate::models::{BundleStatus, BundleTicket, LastUpdated, PackageDescriptor, parse_timestamp};
use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// File name of the package manifest in the export directory.
pub const PACKAGES_MANIFEST: &str = "packages.json";
/// File name of the per-document export timestamps.
pub const LAST_UPDATED_MANIFEST: &str = "last_updated.json";

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// A bundle response whose status has already been checked.
pub struct BundleDownload {
    /// Expected body length, when the server announced one.
    pub total: Option<u64>,
    pub body: ByteStream,
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Raw bytes of a file in the export directory, such as
    /// [`PACKAGES_MANIFEST`].
    async fn fetch_manifest(&self, name: &str) -> Result<Vec<u8>>;

    /// Ask the server to build a bundle containing `titles`.
    ///
    /// Returns [`BundleStatus::Preparing`] while the bundle is still being
    /// built; this method never waits or retries by itself.
    async fn request_bundle(&self, titles: &[String]) -> Result<BundleStatus>;

    /// Start downloading a bundle from a URL handed out in a
    /// [`BundleTicket`].
    async fn open_bundle(&self, url: &str) -> Result<BundleDownload>;
}

pub type CatalogHandle = Arc<dyn CatalogClient + Send + Sync>;
