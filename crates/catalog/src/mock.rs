//! Scriptable [`CatalogClient`] for testing.

use crate::error::{ErrorKind, Result};
use crate::{BundleDownload, BundleStatus, CatalogClient};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// In-memory catalog.
///
/// Bundle requests answer from a script of [`BundleStatus`] values; the last
/// entry repeats once the script runs out. Bundle downloads can be held back
/// behind a [`Notify`] gate, which lets tests observe a download while it is
/// in flight.
///
/// ```
/// use folio_catalog::{BundleStatus, BundleTicket, CatalogClient, MockCatalog};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let ticket = BundleTicket { urls: vec!["mock://bundle.zip".into()], download_size: None };
/// let catalog = MockCatalog::default()
///     .with_bundle_statuses([BundleStatus::Preparing, BundleStatus::Ready(ticket)]);
/// let titles = vec!["Genesis".to_string()];
/// assert_eq!(catalog.request_bundle(&titles).await.unwrap(), BundleStatus::Preparing);
/// assert!(matches!(catalog.request_bundle(&titles).await.unwrap(), BundleStatus::Ready(_)));
/// assert_eq!(catalog.bundle_requests(), 2);
/// # }
/// ```
#[derive(Default)]
pub struct MockCatalog {
    manifests: HashMap<String, Vec<u8>>,
    statuses: Mutex<VecDeque<BundleStatus>>,
    bundles: HashMap<String, std::result::Result<Vec<u8>, u16>>,
    chunk_size: Option<usize>,
    gate: Option<Arc<Notify>>,
    requested: Mutex<Vec<Vec<String>>>,
    requests: AtomicUsize,
    opened: AtomicUsize,
}

impl MockCatalog {
    pub fn with_manifest(mut self, name: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.manifests.insert(name.into(), body.into());
        self
    }

    pub fn with_bundle_statuses(self, statuses: impl IntoIterator<Item = BundleStatus>) -> Self {
        if let Ok(mut script) = self.statuses.lock() {
            script.extend(statuses);
        }
        self
    }

    /// Serve `body` from `url`.
    pub fn with_bundle(mut self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.bundles.insert(url.into(), Ok(body.into()));
        self
    }

    /// Answer `url` with an HTTP error status.
    pub fn with_bundle_status_code(mut self, url: impl Into<String>, status: u16) -> Self {
        self.bundles.insert(url.into(), Err(status));
        self
    }

    /// Split bundle bodies into chunks of `size` bytes.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// Wait for a notification on `gate` before serving each bundle.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Number of [`request_bundle`](CatalogClient::request_bundle) calls so far.
    pub fn bundle_requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Number of [`open_bundle`](CatalogClient::open_bundle) calls so far.
    pub fn bundles_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Title lists of every bundle request, in call order.
    pub fn requested_titles(&self) -> Vec<Vec<String>> {
        self.requested.lock().map(|requested| requested.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CatalogClient for MockCatalog {
    async fn fetch_manifest(&self, name: &str) -> Result<Vec<u8>> {
        match self.manifests.get(name) {
            Some(body) => Ok(body.clone()),
            None => exn::bail!(ErrorKind::Status(404)),
        }
    }

    async fn request_bundle(&self, titles: &[String]) -> Result<BundleStatus> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(titles.to_vec());
        }
        let mut script = self.statuses.lock().map_err(|_| exn::Exn::from(ErrorKind::Network))?;
        let status = match script.len() {
            0 => None,
            1 => script.front().cloned(),
            _ => script.pop_front(),
        };
        status.ok_or_else(|| exn::Exn::from(ErrorKind::Status(500)))
    }

    async fn open_bundle(&self, url: &str) -> Result<BundleDownload> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let body = match self.bundles.get(url) {
            Some(Ok(body)) => body.clone(),
            Some(Err(status)) => exn::bail!(ErrorKind::Status(*status)),
            None => exn::bail!(ErrorKind::Status(404)),
        };
        let total = Some(body.len() as u64);
        let size = self.chunk_size.unwrap_or(body.len().max(1));
        let chunks: Vec<Result<Vec<u8>>> = body.chunks(size).map(|chunk| Ok(chunk.to_vec())).collect();
        Ok(BundleDownload { total, body: Box::pin(futures::stream::iter(chunks)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_chunked_bundle() {
        let catalog = MockCatalog::default().with_bundle("mock://b.zip", b"abcdefg".to_vec()).with_chunk_size(3);
        let download = catalog.open_bundle("mock://b.zip").await.unwrap();
        assert_eq!(download.total, Some(7));
        let chunks: Vec<Vec<u8>> = download.body.try_collect().await.unwrap();
        assert_eq!(chunks, vec![b"abc".to_vec(), b"def".to_vec(), b"g".to_vec()]);
    }

    #[tokio::test]
    async fn test_unknown_manifest_and_bundle() {
        let catalog = MockCatalog::default().with_bundle_status_code("mock://gone.zip", 410);
        let err = catalog.fetch_manifest("packages.json").await.unwrap_err();
        assert_eq!(*err, ErrorKind::Status(404));
        let err = catalog.open_bundle("mock://gone.zip").await.err().unwrap();
        assert_eq!(*err, ErrorKind::Status(410));
    }

    #[tokio::test]
    async fn test_empty_script_is_server_error() {
        let catalog = MockCatalog::default();
        let err = catalog.request_bundle(&[]).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Status(500));
        assert_eq!(catalog.requested_titles(), vec![Vec::<String>::new()]);
    }
}
