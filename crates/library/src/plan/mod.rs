//! Sync planning.
//!
//! Compares the desired set of documents with what is on disk and what the
//! remote "last updated" manifest reports:
//!
//! | desired | on disk | stale | action   |
//! |---------|---------|-------|----------|
//! | yes     | no      |       | download |
//! | yes     | yes     | yes   | download |
//! | yes     | yes     | no    |          |
//! | no      | yes     |       | delete   |
//! | no      | no      |       |          |
//!
//! A document is either desired or not, so the download and delete lists
//! never overlap.

pub mod error;
mod staleness;

pub use self::staleness::{Staleness, TimestampStaleness};
use crate::plan::error::{ErrorKind, Result};
use exn::ResultExt;
use folio_catalog::LastUpdated;
use folio_storage::StorageBackend;
use futures::TryStreamExt;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use time::OffsetDateTime;
use tracing::instrument;

const ARCHIVE_EXTENSION: &str = "zip";

/// Planning view of a single document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Book {
    pub title: String,
    pub desired: bool,
    /// Modification time of the local archive, `None` if there is none.
    pub local_last_updated: Option<OffsetDateTime>,
}

impl Book {
    pub fn is_local(&self) -> bool {
        self.local_last_updated.is_some()
    }
}

/// Every known document, keyed by title. Rebuilt on every pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BooksState {
    books: BTreeMap<String, Book>,
}

impl BooksState {
    pub fn insert(&mut self, book: Book) {
        self.books.insert(book.title.clone(), book);
    }

    pub fn get(&self, title: &str) -> Option<&Book> {
        self.books.get(title)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Book> {
        self.books.values()
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    /// Every known title.
    pub fn titles(&self) -> BTreeSet<String> {
        self.books.keys().cloned().collect()
    }

    /// Recompute `desired` for every book.
    pub fn apply_desired(&mut self, desired: &BTreeSet<String>) {
        for book in self.books.values_mut() {
            book.desired = desired.contains(&book.title);
        }
    }

    /// Forget the local copy of `title`, as after deleting its archive.
    pub fn mark_removed(&mut self, title: &str) {
        if let Some(book) = self.books.get_mut(title) {
            book.local_last_updated = None;
            book.desired = false;
        }
    }
}

impl FromIterator<Book> for BooksState {
    fn from_iter<I: IntoIterator<Item = Book>>(iter: I) -> Self {
        let mut state = Self::default();
        for book in iter {
            state.insert(book);
        }
        state
    }
}

/// Titles that have to be downloaded, in title order.
///
/// Without a "last updated" manifest nothing is downloaded. A desired local
/// document that the manifest has no usable timestamp for is kept as is.
pub fn calculate_books_to_download(
    state: &BooksState,
    last_updated: Option<&LastUpdated>,
    staleness: &dyn Staleness,
) -> Vec<String> {
    let Some(last_updated) = last_updated else {
        tracing::warn!("no last updated manifest, nothing to download");
        return Vec::new();
    };
    let mut download = Vec::new();
    for book in state.iter().filter(|book| book.desired) {
        let Some(local) = book.local_last_updated else {
            download.push(book.title.clone());
            continue;
        };
        match last_updated.timestamp(&book.title) {
            Some(remote) if staleness.is_stale(local, remote) => {
                tracing::debug!(title = %book.title, %local, %remote, "local archive is stale");
                download.push(book.title.clone());
            },
            Some(_) => (),
            None => tracing::debug!(title = %book.title, "no remote timestamp, keeping local archive"),
        }
    }
    download
}

/// Titles present locally that are no longer desired.
pub fn calculate_books_to_delete(state: &BooksState) -> Vec<String> {
    state.iter().filter(|book| !book.desired && book.is_local()).map(|book| book.title.clone()).collect()
}

/// The subset of `titles` without a local archive.
///
/// ```
/// use folio_library::plan::{Book, BooksState, books_not_downloaded};
/// use time::OffsetDateTime;
///
/// let state: BooksState = [
///     Book { title: "Genesis".into(), desired: true, local_last_updated: Some(OffsetDateTime::UNIX_EPOCH) },
///     Book { title: "Exodus".into(), desired: true, local_last_updated: None },
/// ]
/// .into_iter()
/// .collect();
/// let titles = ["Genesis", "Exodus", "Leviticus"].map(String::from);
/// assert_eq!(books_not_downloaded(&state, &titles), vec!["Exodus", "Leviticus"]);
/// ```
pub fn books_not_downloaded(state: &BooksState, titles: &[String]) -> Vec<String> {
    titles.iter().filter(|title| !state.get(title).is_some_and(Book::is_local)).cloned().collect()
}

/// Titles of every `<title>.zip` in the root of `backend` with its
/// modification time.
#[instrument(skip(backend), fields(backend = backend.name()))]
pub async fn get_local_book_list(backend: &dyn StorageBackend) -> Result<BTreeMap<String, OffsetDateTime>> {
    let mut books = BTreeMap::new();
    let mut stream = backend.list_stream(None);
    while let Some(info) = stream.try_next().await.or_raise(|| ErrorKind::Storage)? {
        if let Some(title) = info.top_level_stem(ARCHIVE_EXTENSION) {
            books.insert(title.to_string(), info.modified);
        }
    }
    Ok(books)
}

/// File name of the archive holding `title`.
pub fn archive_name(title: &str) -> String {
    format!("{title}.{ARCHIVE_EXTENSION}")
}

/// Title of the archive at `path`, the inverse of [`archive_name`].
pub fn archive_title(path: &Path) -> Option<&str> {
    path.to_str()?.strip_suffix(ARCHIVE_EXTENSION)?.strip_suffix('.').filter(|title| !title.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_storage::backend::MockBackend;
    use time::Duration;
    use time::macros::datetime;

    const TODAY: OffsetDateTime = datetime!(2024-03-10 12:00 UTC);

    fn book(title: &str, desired: bool, local: Option<OffsetDateTime>) -> Book {
        Book { title: title.to_string(), desired, local_last_updated: local }
    }

    fn last_updated(titles: &[(&str, &str)]) -> LastUpdated {
        LastUpdated {
            titles: titles.iter().map(|(title, stamp)| (title.to_string(), stamp.to_string())).collect(),
            ..LastUpdated::default()
        }
    }

    #[test]
    fn test_stale_book_is_downloaded() {
        let yesterday = TODAY - Duration::days(1);
        let state: BooksState = [book("Genesis", true, Some(yesterday))].into_iter().collect();
        let remote = last_updated(&[("Genesis", "2024-03-10T12:00:00")]);

        let download = calculate_books_to_download(&state, Some(&remote), &TimestampStaleness::default());
        assert_eq!(download, vec!["Genesis"]);
        assert!(calculate_books_to_delete(&state).is_empty());
    }

    #[test]
    fn test_fresh_book_is_kept() {
        let state: BooksState = [book("Genesis", true, Some(TODAY))].into_iter().collect();
        let remote = last_updated(&[("Genesis", "2024-03-09T12:00:00")]);
        assert!(calculate_books_to_download(&state, Some(&remote), &TimestampStaleness::default()).is_empty());
    }

    #[test]
    fn test_missing_book_is_downloaded() {
        let state: BooksState = [book("Genesis", true, None), book("Exodus", false, None)].into_iter().collect();
        let remote = last_updated(&[]);

        let download = calculate_books_to_download(&state, Some(&remote), &TimestampStaleness::default());
        assert_eq!(download, vec!["Genesis"]);
        assert!(calculate_books_to_delete(&state).is_empty());
    }

    #[test]
    fn test_unknown_remote_timestamp_keeps_local() {
        let state: BooksState = [book("Genesis", true, Some(TODAY))].into_iter().collect();
        let remote = last_updated(&[("Genesis", "not a date")]);
        let always = |_: OffsetDateTime, _: OffsetDateTime| true;
        assert!(calculate_books_to_download(&state, Some(&remote), &always).is_empty());
    }

    #[test]
    fn test_no_manifest_still_deletes() {
        let state: BooksState =
            [book("Genesis", true, None), book("Berakhot", false, Some(TODAY))].into_iter().collect();
        assert!(calculate_books_to_download(&state, None, &TimestampStaleness::default()).is_empty());
        assert_eq!(calculate_books_to_delete(&state), vec!["Berakhot"]);
    }

    #[test]
    fn test_plans_are_disjoint() {
        let week_ago = TODAY - Duration::days(7);
        let state: BooksState = [
            book("Genesis", true, None),
            book("Exodus", true, Some(week_ago)),
            book("Leviticus", true, Some(TODAY)),
            book("Berakhot", false, Some(week_ago)),
            book("Shabbat", false, None),
        ]
        .into_iter()
        .collect();
        let remote = last_updated(&[
            ("Genesis", "2024-03-10T12:00:00"),
            ("Exodus", "2024-03-10T12:00:00"),
            ("Leviticus", "2024-03-10T12:00:00"),
            ("Berakhot", "2024-03-10T12:00:00"),
        ]);

        let download = calculate_books_to_download(&state, Some(&remote), &TimestampStaleness::default());
        let delete = calculate_books_to_delete(&state);
        assert_eq!(download, vec!["Exodus", "Genesis"]);
        assert_eq!(delete, vec!["Berakhot"]);
        assert!(download.iter().all(|title| !delete.contains(title)));
    }

    #[test]
    fn test_mark_removed() {
        let mut state: BooksState = [book("Genesis", true, Some(TODAY))].into_iter().collect();
        state.mark_removed("Genesis");
        assert_eq!(state.get("Genesis"), Some(&book("Genesis", false, None)));
    }

    #[tokio::test]
    async fn test_local_book_list() {
        let backend = MockBackend::with_files([
            ("Genesis.zip", b"a".as_slice()),
            ("Rashi on Genesis.zip", b"b".as_slice()),
            ("packages.json", b"[]".as_slice()),
            ("tmp/Exodus.zip", b"c".as_slice()),
        ]);
        let books = get_local_book_list(&backend).await.unwrap();
        assert_eq!(books.keys().collect::<Vec<_>>(), vec!["Genesis", "Rashi on Genesis"]);
        assert!(backend.exists(Path::new(&archive_name("Genesis"))).await.unwrap());
        assert_eq!(archive_title(Path::new("Rashi on Genesis.zip")), Some("Rashi on Genesis"));
        assert_eq!(archive_title(Path::new("packages.json")), None);
    }
}
