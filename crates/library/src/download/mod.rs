//! Single-flight bundle downloads.
//!
//! A [`Downloader`] runs at most one session at a time: it asks the server
//! for a bundle of the requested documents, streams it to the temporary
//! directory and extracts the per-document archives it contains into the
//! archive store. Starting a second session while one is running fails
//! immediately, and a running session can be cancelled from any task.
//!
//! The state machine is simply `idle -> downloading -> idle`; the session is
//! cleared however the transfer ends.

pub mod error;
mod progress;

pub use self::progress::Progress;
use self::progress::Tracker;
use crate::download::error::{ErrorKind, Result};
use crate::plan;
use exn::ResultExt;
use folio_catalog::{BundleStatus, BundleTicket, CatalogHandle};
use folio_config::SyncConfig;
use folio_storage::BackendHandle;
use futures::StreamExt;
use std::collections::BTreeSet;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Extra bundle requests while the server is still preparing.
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Minimum time between two progress callbacks.
    pub progress_interval: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for DownloadOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.bundle_max_retries,
            retry_delay: config.bundle_retry_delay(),
            progress_interval: config.progress_interval(),
        }
    }
}

struct Session {
    titles: Vec<String>,
    cancel: CancellationToken,
}

fn lock(session: &Mutex<Option<Session>>) -> MutexGuard<'_, Option<Session>> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the session when the transfer ends, including when its future is
/// dropped half way.
struct SessionGuard<'a> {
    session: &'a Mutex<Option<Session>>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        lock(self.session).take();
    }
}

pub struct Downloader {
    catalog: CatalogHandle,
    archives: BackendHandle,
    tmp_dir: PathBuf,
    options: DownloadOptions,
    session: Mutex<Option<Session>>,
}

impl Downloader {
    /// Bundles are staged in `tmp_dir`, a local directory that is created on
    /// demand.
    pub fn new(catalog: CatalogHandle, archives: BackendHandle, tmp_dir: impl Into<PathBuf>, options: DownloadOptions) -> Self {
        Self { catalog, archives, tmp_dir: tmp_dir.into(), options, session: Mutex::new(None) }
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    pub fn download_in_progress(&self) -> bool {
        lock(&self.session).is_some()
    }

    /// Titles requested by the running session.
    pub fn session_titles(&self) -> Option<Vec<String>> {
        lock(&self.session).as_ref().map(|session| session.titles.clone())
    }

    /// Cancel the running session. Its [`start_download`](Self::start_download)
    /// call returns [`ErrorKind::Cancelled`].
    pub fn cancel_download(&self) -> Result<()> {
        match lock(&self.session).as_ref() {
            Some(session) => {
                tracing::info!(titles = session.titles.len(), "cancelling download");
                session.cancel.cancel();
                Ok(())
            },
            None => exn::bail!(ErrorKind::NotDownloading),
        }
    }

    /// Ask for a bundle of `titles` until the server has one ready.
    ///
    /// Only the "still preparing" answer is retried, at most `max_retries`
    /// times with the configured delay in between; every other failure is
    /// returned straight away.
    #[instrument(skip(self, titles), fields(titles = titles.len()))]
    pub async fn request_new_bundle(&self, titles: &[String], max_retries: u32) -> Result<BundleTicket> {
        let attempts = max_retries.saturating_add(1);
        for attempt in 1..=attempts {
            match self.catalog.request_bundle(titles).await.or_raise(|| ErrorKind::Catalog)? {
                BundleStatus::Ready(ticket) => {
                    tracing::debug!(attempt, urls = ticket.urls.len(), size = ?ticket.download_size, "bundle ready");
                    return Ok(ticket);
                },
                BundleStatus::Preparing if attempt < attempts => {
                    tracing::debug!(attempt, delay = ?self.options.retry_delay, "bundle still being prepared");
                    tokio::time::sleep(self.options.retry_delay).await;
                },
                BundleStatus::Preparing => (),
            }
        }
        exn::bail!(ErrorKind::BundleNotReady(attempts))
    }

    /// Download `titles` in one bundle and extract their archives into the
    /// archive store.
    ///
    /// Returns the archive paths written. On failure the temporary bundle is
    /// removed and no archive is left half written.
    #[instrument(skip(self, titles, on_progress), fields(titles = titles.len()))]
    pub async fn start_download(
        &self,
        titles: &[String],
        on_progress: &(dyn Fn(Progress) + Send + Sync),
    ) -> Result<Vec<PathBuf>> {
        let cancel = self.begin(titles)?;
        let _guard = SessionGuard { session: &self.session };

        let mut staged = Vec::new();
        let result = self.transfer(titles, &cancel, on_progress, &mut staged).await;
        for path in &staged {
            if let Err(err) = tokio::fs::remove_file(path).await
                && err.kind() != IoErrorKind::NotFound
            {
                tracing::warn!(path = %path.display(), error = %err, "could not remove temporary bundle");
            }
        }
        match &result {
            Ok(archives) => tracing::info!(archives = archives.len(), "download complete"),
            Err(err) => tracing::warn!(error = %err, "download failed"),
        }
        result
    }

    fn begin(&self, titles: &[String]) -> Result<CancellationToken> {
        let mut session = lock(&self.session);
        if session.is_some() {
            exn::bail!(ErrorKind::AlreadyInProgress);
        }
        let cancel = CancellationToken::new();
        *session = Some(Session { titles: titles.to_vec(), cancel: cancel.clone() });
        Ok(cancel)
    }

    async fn transfer(
        &self,
        titles: &[String],
        cancel: &CancellationToken,
        on_progress: &(dyn Fn(Progress) + Send + Sync),
        staged: &mut Vec<PathBuf>,
    ) -> Result<Vec<PathBuf>> {
        let ticket = tokio::select! {
            biased;
            _ = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
            ticket = self.request_new_bundle(titles, self.options.max_retries) => ticket?,
        };
        if ticket.urls.is_empty() {
            exn::bail!(ErrorKind::EmptyBundle);
        }
        tokio::fs::create_dir_all(&self.tmp_dir).await.or_raise(|| ErrorKind::TempFile)?;

        let single = ticket.urls.len() == 1;
        let mut tracker = Tracker::new(ticket.download_size, self.options.progress_interval, on_progress);
        for (index, url) in ticket.urls.iter().enumerate() {
            let path = self.tmp_dir.join(format!("bundle-{index}.zip"));
            staged.push(path.clone());
            self.fetch(url, &path, cancel, &mut tracker, single).await?;
        }
        tracker.finish();

        // Everything is on disk before the first archive is touched.
        let requested: Arc<BTreeSet<PathBuf>> =
            Arc::new(titles.iter().map(|title| PathBuf::from(plan::archive_name(title))).collect());
        let mut extracted = Vec::new();
        for path in staged.iter() {
            if cancel.is_cancelled() {
                exn::bail!(ErrorKind::Cancelled);
            }
            let wanted = Arc::clone(&requested);
            let keep = move |entry: &Path| {
                let keep = wanted.contains(entry);
                if !keep {
                    tracing::warn!(entry = %entry.display(), "skipping bundle entry that was not requested");
                }
                keep
            };
            let archives = folio_storage::unpack_file_into(self.archives.as_ref(), path, None, keep)
                .await
                .or_raise(|| ErrorKind::Storage)?;
            extracted.extend(archives);
        }
        let missing: Vec<&PathBuf> = requested.iter().filter(|archive| !extracted.contains(*archive)).collect();
        if !missing.is_empty() {
            tracing::warn!(?missing, "bundle did not contain every requested archive");
        }
        Ok(extracted)
    }

    async fn fetch(
        &self,
        url: &str,
        path: &Path,
        cancel: &CancellationToken,
        tracker: &mut Tracker<'_>,
        adopt_total: bool,
    ) -> Result<()> {
        let download = tokio::select! {
            biased;
            _ = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
            download = self.catalog.open_bundle(url) => download.or_raise(|| ErrorKind::Catalog)?,
        };
        if adopt_total {
            tracker.set_total_if_unknown(download.total);
        }
        let mut body = download.body;
        let mut file = tokio::fs::File::create(path).await.or_raise(|| ErrorKind::TempFile)?;
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
                chunk = body.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk.or_raise(|| ErrorKind::Catalog)?;
            file.write_all(&chunk).await.or_raise(|| ErrorKind::TempFile)?;
            tracker.advance(chunk.len());
        }
        file.flush().await.or_raise(|| ErrorKind::TempFile)?;
        tracing::debug!(url, path = %path.display(), "bundle stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_catalog::MockCatalog;
    use folio_storage::StorageBackend;
    use folio_storage::backend::MockBackend;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    const BUNDLE_URL: &str = "mock://bundles/0.zip";

    fn titles(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn ticket(urls: &[&str]) -> BundleStatus {
        BundleStatus::Ready(BundleTicket { urls: titles(urls), download_size: None })
    }

    fn bundle() -> Vec<u8> {
        folio_archive::pack([("Genesis.zip", b"genesis".as_slice()), ("Exodus.zip", b"exodus".as_slice())]).unwrap()
    }

    fn options() -> DownloadOptions {
        DownloadOptions { max_retries: 1, retry_delay: Duration::from_millis(1), progress_interval: Duration::ZERO }
    }

    struct Harness {
        catalog: Arc<MockCatalog>,
        archives: Arc<MockBackend>,
        tmp: TempDir,
        downloader: Arc<Downloader>,
    }

    fn harness(catalog: MockCatalog) -> Harness {
        let catalog = Arc::new(catalog);
        let archives = Arc::new(MockBackend::default());
        let tmp = tempfile::tempdir().unwrap();
        let downloader = Arc::new(Downloader::new(catalog.clone(), archives.clone(), tmp.path().join("tmp"), options()));
        Harness { catalog, archives, tmp, downloader }
    }

    fn leftover_files(tmp: &TempDir) -> usize {
        match std::fs::read_dir(tmp.path().join("tmp")) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    fn ignore(_: Progress) {}

    async fn wait_for_session(downloader: &Downloader) {
        while !downloader.download_in_progress() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_retry_while_preparing() {
        let h = harness(MockCatalog::default().with_bundle_statuses([BundleStatus::Preparing, ticket(&[BUNDLE_URL])]));
        let ticket = h.downloader.request_new_bundle(&titles(&["Genesis"]), 1).await.unwrap();
        assert_eq!(ticket.urls, vec![BUNDLE_URL]);
        assert_eq!(h.catalog.bundle_requests(), 2);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let h = harness(MockCatalog::default().with_bundle_statuses([BundleStatus::Preparing]));
        let err = h.downloader.request_new_bundle(&titles(&["Genesis"]), 2).await.unwrap_err();
        assert_eq!(&*err, &ErrorKind::BundleNotReady(3));
        assert_eq!(h.catalog.bundle_requests(), 3);
    }

    #[tokio::test]
    async fn test_download_extracts_archives() {
        let bundle = bundle();
        let h = harness(
            MockCatalog::default()
                .with_bundle_statuses([ticket(&[BUNDLE_URL])])
                .with_bundle(BUNDLE_URL, bundle.clone())
                .with_chunk_size(16),
        );
        let seen = Mutex::new(Vec::new());
        let record = |progress: Progress| seen.lock().unwrap().push(progress);

        let written = h.downloader.start_download(&titles(&["Genesis", "Exodus"]), &record).await.unwrap();

        assert_eq!(written, vec![PathBuf::from("Genesis.zip"), PathBuf::from("Exodus.zip")]);
        assert_eq!(h.archives.read(Path::new("Exodus.zip")).await.unwrap(), b"exodus");
        assert_eq!(h.catalog.requested_titles(), vec![titles(&["Genesis", "Exodus"])]);
        assert_eq!(leftover_files(&h.tmp), 0);
        assert!(!h.downloader.download_in_progress());
        let seen = seen.into_inner().unwrap();
        let expected = bundle.len() as u64;
        assert_eq!(seen.last(), Some(&Progress { downloaded: expected, total: Some(expected) }));
        assert!(seen.windows(2).all(|pair| pair[0].downloaded <= pair[1].downloaded));
    }

    #[tokio::test]
    async fn test_only_requested_archives_are_extracted() {
        let bundle = folio_archive::pack([
            ("Genesis.zip", b"genesis".as_slice()),
            ("packages.json", b"[\"stray\"]".as_slice()),
            ("Leviticus.zip", b"leviticus".as_slice()),
        ])
        .unwrap();
        let h = harness(MockCatalog::default().with_bundle_statuses([ticket(&[BUNDLE_URL])]).with_bundle(BUNDLE_URL, bundle));
        h.archives.write(Path::new("packages.json"), b"[]").await.unwrap();

        let written = h.downloader.start_download(&titles(&["Genesis", "Exodus"]), &ignore).await.unwrap();

        assert_eq!(written, vec![PathBuf::from("Genesis.zip")]);
        assert_eq!(h.archives.read(Path::new("packages.json")).await.unwrap(), b"[]");
        assert!(!h.archives.exists(Path::new("Leviticus.zip")).await.unwrap());
        assert_eq!(leftover_files(&h.tmp), 0);
    }

    #[tokio::test]
    async fn test_second_download_fails_fast() {
        let gate = Arc::new(Notify::new());
        let h = harness(
            MockCatalog::default()
                .with_bundle_statuses([ticket(&[BUNDLE_URL])])
                .with_bundle(BUNDLE_URL, bundle())
                .with_gate(gate.clone()),
        );
        let downloader = h.downloader.clone();
        let first = tokio::spawn(async move { downloader.start_download(&titles(&["Genesis"]), &ignore).await });
        wait_for_session(&h.downloader).await;

        let err = h.downloader.start_download(&titles(&["Exodus"]), &ignore).await.unwrap_err();
        assert_eq!(&*err, &ErrorKind::AlreadyInProgress);
        assert_eq!(h.downloader.session_titles(), Some(titles(&["Genesis"])));

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert!(!h.downloader.download_in_progress());
        assert_eq!(h.catalog.bundle_requests(), 1);
    }

    #[tokio::test]
    async fn test_cancel_in_flight() {
        let gate = Arc::new(Notify::new());
        let h = harness(
            MockCatalog::default()
                .with_bundle_statuses([ticket(&[BUNDLE_URL])])
                .with_bundle(BUNDLE_URL, bundle())
                .with_gate(gate),
        );
        let downloader = h.downloader.clone();
        let running = tokio::spawn(async move { downloader.start_download(&titles(&["Genesis"]), &ignore).await });
        wait_for_session(&h.downloader).await;

        h.downloader.cancel_download().unwrap();
        let err = running.await.unwrap().unwrap_err();
        assert_eq!(&*err, &ErrorKind::Cancelled);
        assert!(!h.downloader.download_in_progress());
        assert!(h.archives.paths().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_while_idle() {
        let h = harness(MockCatalog::default());
        let err = h.downloader.cancel_download().unwrap_err();
        assert_eq!(&*err, &ErrorKind::NotDownloading);
    }

    #[tokio::test]
    async fn test_corrupt_bundle_leaves_nothing_behind() {
        let h = harness(
            MockCatalog::default()
                .with_bundle_statuses([ticket(&[BUNDLE_URL])])
                .with_bundle(BUNDLE_URL, b"definitely not a zip".to_vec()),
        );
        let err = h.downloader.start_download(&titles(&["Genesis"]), &ignore).await.unwrap_err();
        assert_eq!(&*err, &ErrorKind::Storage);
        assert_eq!(leftover_files(&h.tmp), 0);
        assert!(h.archives.paths().await.is_empty());
        assert!(!h.downloader.download_in_progress());
    }

    #[tokio::test]
    async fn test_http_error_is_fatal() {
        let h = harness(
            MockCatalog::default().with_bundle_statuses([ticket(&[BUNDLE_URL])]).with_bundle_status_code(BUNDLE_URL, 404),
        );
        let err = h.downloader.start_download(&titles(&["Genesis"]), &ignore).await.unwrap_err();
        assert_eq!(&*err, &ErrorKind::Catalog);
        assert_eq!(h.catalog.bundle_requests(), 1);
        assert!(!h.downloader.download_in_progress());
    }

    #[tokio::test]
    async fn test_ticket_without_location() {
        let h = harness(MockCatalog::default().with_bundle_statuses([ticket(&[])]));
        let err = h.downloader.start_download(&titles(&["Genesis"]), &ignore).await.unwrap_err();
        assert_eq!(&*err, &ErrorKind::EmptyBundle);
        assert_eq!(h.catalog.bundles_opened(), 0);
    }
}
