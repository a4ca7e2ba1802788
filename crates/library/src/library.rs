use crate::MAX_DELETE_CONCURRENCY;
use crate::download::{DownloadOptions, Downloader, Progress};
use crate::error::{ErrorKind, Result};
use crate::packages::{self, PackageTree, ROOT_PACKAGE, Selections};
use crate::plan::{self, Book, BooksState, Staleness, TimestampStaleness};
use exn::ResultExt;
use folio_catalog::{
    BundleTicket, CatalogHandle, LAST_UPDATED_MANIFEST, LastUpdated, PACKAGES_MANIFEST, PackageDescriptor,
};
use folio_config::Config;
use folio_state::{StoreHandle, keys};
use folio_storage::BackendHandle;
use folio_storage::error::ErrorKind as StorageErrorKind;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::io::ErrorKind as IoErrorKind;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// Result of the latest resolution pass.
#[derive(Debug, Clone)]
pub struct LibraryState {
    pub packages: PackageTree,
    pub books: BooksState,
    /// `None` until `last_updated.json` has been downloaded.
    pub last_updated: Option<LastUpdated>,
}

impl LibraryState {
    fn refresh_desired(&mut self) {
        let desired = self.packages.desired_titles(&self.books.titles());
        self.books.apply_desired(&desired);
    }
}

/// Outcome of [`Library::check_updates_from_server`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateCheck {
    /// Everything the next sync would download.
    pub to_download: Vec<String>,
    /// The part of `to_download` not present locally at all.
    pub new_books: Vec<String>,
}

impl UpdateCheck {
    /// Number of local documents with a newer remote export.
    pub fn updates(&self) -> usize {
        self.to_download.len().saturating_sub(self.new_books.len())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub deleted: Vec<String>,
    pub downloaded: Vec<String>,
}

/// The offline library: selections, local archives and the sync engine.
///
/// Resolution results are cached in memory and replaced by every
/// [`package_setup_protocol`](Self::package_setup_protocol) pass, so any
/// number of independent libraries can coexist in one process.
pub struct Library {
    archives: BackendHandle,
    store: StoreHandle,
    catalog: CatalogHandle,
    downloader: Downloader,
    staleness: Box<dyn Staleness>,
    schema_version: String,
    update_interval: Duration,
    state: RwLock<Option<Arc<LibraryState>>>,
    /// Serializes read-modify-publish cycles on `state`.
    updates: Mutex<()>,
}

impl Library {
    pub fn new(config: &Config, archives: BackendHandle, store: StoreHandle, catalog: CatalogHandle) -> Self {
        let downloader =
            Downloader::new(catalog.clone(), archives.clone(), &config.tmp_dir, DownloadOptions::from(&config.sync));
        Self {
            archives,
            store,
            catalog,
            downloader,
            staleness: Box::new(TimestampStaleness::from(&config.sync)),
            schema_version: config.server.schema_version.clone(),
            update_interval: config.sync.update_interval(),
            state: RwLock::new(None),
            updates: Mutex::new(()),
        }
    }

    /// Replace the staleness predicate used for planning.
    pub fn with_staleness(mut self, staleness: impl Staleness + 'static) -> Self {
        self.staleness = Box::new(staleness);
        self
    }

    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    /// Resolve packages and rebuild the books state from scratch.
    ///
    /// Persisted selections are corrected and written back once if the
    /// correction changed them; a second pass over the same inputs writes
    /// nothing.
    #[instrument(skip(self))]
    pub async fn package_setup_protocol(&self) -> Result<Arc<LibraryState>> {
        let _update = self.updates.lock().await;
        self.resolve().await
    }

    /// The current state, resolving it first if nothing has been resolved
    /// yet.
    pub async fn state(&self) -> Result<Arc<LibraryState>> {
        if let Some(state) = self.state.read().await.clone() {
            return Ok(state);
        }
        let _update = self.updates.lock().await;
        self.current_or_resolve().await
    }

    /// Callers hold `updates`.
    async fn current_or_resolve(&self) -> Result<Arc<LibraryState>> {
        let cached = self.state.read().await.clone();
        match cached {
            Some(state) => Ok(state),
            None => self.resolve().await,
        }
    }

    /// Callers hold `updates`.
    async fn resolve(&self) -> Result<Arc<LibraryState>> {
        let manifest: Vec<PackageDescriptor> = match self.read_manifest(PACKAGES_MANIFEST).await? {
            Some(manifest) => manifest,
            None => exn::bail!(ErrorKind::MissingManifest(PACKAGES_MANIFEST)),
        };
        let raw = self.store.get(keys::PACKAGES_SELECTED).await.or_raise(|| ErrorKind::State)?;
        let persisted = packages::parse_selections(raw.as_deref());
        let resolution = packages::resolve(manifest, &persisted).or_raise(|| ErrorKind::Packages)?;
        if resolution.changed {
            self.persist_selections(&resolution.selections).await?;
        }

        let last_updated = match self.read_manifest::<LastUpdated>(LAST_UPDATED_MANIFEST).await {
            Ok(last_updated) => last_updated,
            Err(err) if matches!(err.deref(), ErrorKind::MalformedManifest(_)) => {
                tracing::warn!(error = %err, "ignoring unreadable last updated manifest");
                None
            },
            Err(err) => return Err(err),
        };
        let state = self.build_state(resolution.tree, last_updated).await?;
        tracing::info!(
            packages = state.packages.len(),
            books = state.books.len(),
            selected = resolution.selections.len(),
            "library resolved"
        );
        Ok(self.publish(state).await)
    }

    pub async fn calculate_books_to_download(&self) -> Result<Vec<String>> {
        let state = self.state().await?;
        Ok(plan::calculate_books_to_download(&state.books, state.last_updated.as_ref(), self.staleness.as_ref()))
    }

    pub async fn calculate_books_to_delete(&self) -> Result<Vec<String>> {
        Ok(plan::calculate_books_to_delete(&self.state().await?.books))
    }

    /// The subset of `titles` without a local archive.
    pub async fn books_not_downloaded(&self, titles: &[String]) -> Result<Vec<String>> {
        Ok(plan::books_not_downloaded(&self.state().await?.books, titles))
    }

    /// Titles of every archive in the archive store.
    pub async fn get_local_book_list(&self) -> Result<Vec<String>> {
        let local = plan::get_local_book_list(self.archives.as_ref()).await.or_raise(|| ErrorKind::Plan)?;
        Ok(local.into_keys().collect())
    }

    /// Any package selected at all.
    pub async fn were_books_downloaded(&self) -> Result<bool> {
        Ok(self.state().await?.packages.any_selected())
    }

    #[instrument(skip(self))]
    pub async fn select(&self, name: &str) -> Result<()> {
        let _update = self.updates.lock().await;
        let mut state = LibraryState::clone(&*self.current_or_resolve().await?);
        state.packages.select(name).or_raise(|| ErrorKind::Packages)?;
        self.persist_selections(&state.packages.selections()).await?;
        state.refresh_desired();
        self.publish(state).await;
        tracing::info!(package = name, "package selected");
        Ok(())
    }

    /// Deselect `name` and all of its descendants.
    ///
    /// Returns the titles that are now on disk but no longer desired. Nothing
    /// is deleted yet; see [`delete_books`](Self::delete_books).
    #[instrument(skip(self))]
    pub async fn deselect(&self, name: &str) -> Result<Vec<String>> {
        let _update = self.updates.lock().await;
        let mut state = LibraryState::clone(&*self.current_or_resolve().await?);
        state.packages.deselect(name).or_raise(|| ErrorKind::Packages)?;
        self.persist_selections(&state.packages.selections()).await?;
        state.refresh_desired();
        let to_delete = plan::calculate_books_to_delete(&state.books);
        self.publish(state).await;
        tracing::info!(package = name, to_delete = to_delete.len(), "package deselected");
        Ok(to_delete)
    }

    /// Deselect everything. Returns the titles to delete.
    pub async fn mark_library_for_deletion(&self) -> Result<Vec<String>> {
        self.deselect(ROOT_PACKAGE).await
    }

    /// Delete the archives of `titles`, then empty the temporary directory.
    ///
    /// A failed deletion is logged and skipped. Returns the titles whose
    /// archive was actually removed.
    #[instrument(skip(self, titles), fields(titles = titles.len()))]
    pub async fn delete_books(&self, titles: &[String]) -> Result<Vec<String>> {
        let archives = &self.archives;
        let mut deleted: Vec<String> = futures::stream::iter(titles)
            .map(|title| async move {
                match archives.delete(Path::new(&plan::archive_name(title))).await {
                    Ok(()) => Some(title.clone()),
                    Err(err) if matches!(err.deref(), StorageErrorKind::NotFound(_)) => None,
                    Err(err) => {
                        tracing::warn!(title = %title, error = %err, "could not delete archive");
                        None
                    },
                }
            })
            .buffer_unordered(MAX_DELETE_CONCURRENCY)
            .filter_map(futures::future::ready)
            .collect()
            .await;
        deleted.sort();

        {
            let _update = self.updates.lock().await;
            let current = self.state.read().await.clone();
            if let Some(current) = current {
                let mut state = LibraryState::clone(&current);
                for title in titles {
                    state.books.mark_removed(title);
                }
                self.publish(state).await;
            }
        }
        self.clean_tmp_directory().await?;
        tracing::info!(deleted = deleted.len(), "archives deleted");
        Ok(deleted)
    }

    /// `true` if the server has not been checked within the update interval,
    /// or never.
    pub async fn auto_update_check(&self) -> Result<bool> {
        let raw = self.store.get(keys::LAST_UPDATE_CHECK).await.or_raise(|| ErrorKind::State)?;
        let last_check = raw.as_deref().and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok());
        Ok(match last_check {
            Some(last_check) => OffsetDateTime::now_utc() > last_check + self.update_interval,
            None => true,
        })
    }

    /// Delete every local archive if they were downloaded with a different
    /// export schema. Selections are kept, so the next sync downloads the
    /// library again.
    ///
    /// Returns `true` if a purge happened.
    #[instrument(skip(self))]
    pub async fn schema_check_and_purge(&self) -> Result<bool> {
        let raw = self.store.get(keys::LAST_UPDATE_SCHEMA).await.or_raise(|| ErrorKind::State)?;
        let stored = raw.as_deref().map(|raw| raw.trim().trim_matches('"')).filter(|stored| !stored.is_empty());
        let purge = stored.is_some_and(|stored| stored != self.schema_version);
        if purge {
            let local = self.get_local_book_list().await?;
            tracing::warn!(
                from = stored,
                to = %self.schema_version,
                books = local.len(),
                "export schema changed, purging local archives"
            );
            self.delete_books(&local).await?;
        }
        self.store.set(keys::LAST_UPDATE_SCHEMA, &self.schema_version).await.or_raise(|| ErrorKind::State)?;
        Ok(purge)
    }

    /// Refresh both manifests from the server and re-resolve.
    ///
    /// The manifests are validated before either is installed, and only
    /// replace the local copies once both have been written.
    #[instrument(skip(self))]
    pub async fn check_updates_from_server(&self) -> Result<UpdateCheck> {
        self.schema_check_and_purge().await?;
        let now = OffsetDateTime::now_utc().format(&Rfc3339).or_raise(|| ErrorKind::State)?;
        self.store.set(keys::LAST_UPDATE_CHECK, &now).await.or_raise(|| ErrorKind::State)?;

        let (packages, last_updated) = tokio::try_join!(
            self.fetch_manifest::<Vec<PackageDescriptor>>(PACKAGES_MANIFEST),
            self.fetch_manifest::<LastUpdated>(LAST_UPDATED_MANIFEST),
        )?;
        self.install_manifests(&[(PACKAGES_MANIFEST, packages), (LAST_UPDATED_MANIFEST, last_updated)]).await?;

        let state = self.package_setup_protocol().await?;
        let to_download =
            plan::calculate_books_to_download(&state.books, state.last_updated.as_ref(), self.staleness.as_ref());
        let new_books = plan::books_not_downloaded(&state.books, &to_download);
        tracing::info!(to_download = to_download.len(), new_books = new_books.len(), "update check complete");
        Ok(UpdateCheck { to_download, new_books })
    }

    /// Apply the current plan: delete what is no longer desired, then
    /// download what is missing or stale in one bundle.
    ///
    /// Downloaded archives get the remote export time as their modification
    /// time, so the next plan compares like with like.
    #[instrument(skip(self, on_progress))]
    pub async fn download_update(&self, on_progress: &(dyn Fn(Progress) + Send + Sync)) -> Result<SyncReport> {
        let state = self.state().await?;
        let to_delete = plan::calculate_books_to_delete(&state.books);
        let to_download =
            plan::calculate_books_to_download(&state.books, state.last_updated.as_ref(), self.staleness.as_ref());
        tracing::info!(download = to_download.len(), delete = to_delete.len(), "applying sync plan");

        let deleted = self.delete_books(&to_delete).await?;
        let mut downloaded = Vec::new();
        if !to_download.is_empty() {
            let written =
                self.downloader.start_download(&to_download, on_progress).await.or_raise(|| ErrorKind::Download)?;
            downloaded = self.stamp_archives(&written, state.last_updated.as_ref()).await;
            self.clean_tmp_directory().await?;
        }
        self.package_setup_protocol().await?;
        Ok(SyncReport { deleted, downloaded })
    }

    /// See [`Downloader::request_new_bundle`].
    pub async fn request_new_bundle(&self, titles: &[String], max_retries: u32) -> Result<BundleTicket> {
        self.downloader.request_new_bundle(titles, max_retries).await.or_raise(|| ErrorKind::Download)
    }

    pub fn cancel_download(&self) -> Result<()> {
        self.downloader.cancel_download().or_raise(|| ErrorKind::Download)
    }

    /// Remove everything in the temporary directory. Skipped while a
    /// download is staging its bundle there.
    pub async fn clean_tmp_directory(&self) -> Result<()> {
        if self.downloader.download_in_progress() {
            tracing::debug!("download in progress, leaving temporary directory alone");
            return Ok(());
        }
        let mut entries = match tokio::fs::read_dir(self.downloader.tmp_dir()).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err).or_raise(|| ErrorKind::TempDirectory),
        };
        while let Some(entry) = entries.next_entry().await.or_raise(|| ErrorKind::TempDirectory)? {
            let path = entry.path();
            let removed = match entry.file_type().await.or_raise(|| ErrorKind::TempDirectory)?.is_dir() {
                true => tokio::fs::remove_dir_all(&path).await,
                false => tokio::fs::remove_file(&path).await,
            };
            removed.or_raise(|| ErrorKind::TempDirectory)?;
        }
        Ok(())
    }

    async fn build_state(&self, packages: PackageTree, last_updated: Option<LastUpdated>) -> Result<LibraryState> {
        let local = plan::get_local_book_list(self.archives.as_ref()).await.or_raise(|| ErrorKind::Plan)?;
        let mut all_books = packages.all_titles();
        if let Some(last_updated) = &last_updated {
            all_books.extend(last_updated.titles.keys().cloned());
        }
        all_books.extend(local.keys().cloned());

        let desired = packages.desired_titles(&all_books);
        let books = all_books
            .into_iter()
            .map(|title| Book {
                desired: desired.contains(&title),
                local_last_updated: local.get(&title).copied(),
                title,
            })
            .collect();
        Ok(LibraryState { packages, books, last_updated })
    }

    async fn publish(&self, state: LibraryState) -> Arc<LibraryState> {
        let state = Arc::new(state);
        *self.state.write().await = Some(state.clone());
        state
    }

    async fn persist_selections(&self, selections: &Selections) -> Result<()> {
        let encoded = serde_json::to_string(selections).or_raise(|| ErrorKind::State)?;
        self.store.set(keys::PACKAGES_SELECTED, &encoded).await.or_raise(|| ErrorKind::State)
    }

    async fn read_manifest<T: DeserializeOwned>(&self, name: &'static str) -> Result<Option<T>> {
        let data = match self.archives.read(Path::new(name)).await {
            Ok(data) => data,
            Err(err) if matches!(err.deref(), StorageErrorKind::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err).or_raise(|| ErrorKind::Storage),
        };
        serde_json::from_slice(&data).map(Some).or_raise(|| ErrorKind::MalformedManifest(name))
    }

    /// Fetch a manifest and check that it parses as `T`.
    async fn fetch_manifest<T: DeserializeOwned>(&self, name: &'static str) -> Result<Vec<u8>> {
        let data = self.catalog.fetch_manifest(name).await.or_raise(|| ErrorKind::Catalog)?;
        serde_json::from_slice::<T>(&data).or_raise(|| ErrorKind::MalformedManifest(name))?;
        Ok(data)
    }

    async fn install_manifests(&self, manifests: &[(&'static str, Vec<u8>)]) -> Result<()> {
        let staged = |name: &str| PathBuf::from(format!("{name}.part"));
        for (name, data) in manifests {
            self.archives.write(&staged(name), data).await.or_raise(|| ErrorKind::Storage)?;
        }
        for (name, _) in manifests {
            self.archives.rename(&staged(name), Path::new(name)).await.or_raise(|| ErrorKind::Storage)?;
        }
        Ok(())
    }

    async fn stamp_archives(&self, written: &[PathBuf], last_updated: Option<&LastUpdated>) -> Vec<String> {
        let mut titles = Vec::with_capacity(written.len());
        for path in written {
            let Some(title) = plan::archive_title(path) else {
                tracing::debug!(path = %path.display(), "bundle contained a non-archive entry");
                continue;
            };
            if let Some(remote) = last_updated.and_then(|last_updated| last_updated.timestamp(title))
                && let Err(err) = self.archives.set_modified(path, remote).await
            {
                tracing::warn!(title, error = %err, "could not stamp archive modification time");
            }
            titles.push(title.to_string());
        }
        titles
    }
}
