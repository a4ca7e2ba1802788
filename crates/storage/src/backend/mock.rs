//! In-memory storage backend for testing.

use super::FileInfoStream;
use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use crate::{FileInfo, StorageBackend};
use async_stream::stream;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use time::OffsetDateTime;
use tokio::sync::{Notify, RwLock};

struct Stored {
    modified: OffsetDateTime,
    data: Vec<u8>,
}

/// In-memory storage backend for testing.
///
/// Files live in a map behind a [`RwLock`]. Reads are counted so tests can
/// assert that a cached value was served without touching storage,
/// individual paths can be made to fail on write, and reads of a path can be
/// held until a test releases them.
///
/// ```
/// use folio_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([("Genesis.zip", b"zip-bytes")]);
/// assert!(backend.exists(Path::new("Genesis.zip")).await?);
/// assert_eq!(backend.read_count(), 0);
/// backend.read(Path::new("Genesis.zip")).await?;
/// assert_eq!(backend.read_count(), 1);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<BTreeMap<PathBuf, Stored>>,
    failing: std::sync::RwLock<HashSet<PathBuf>>,
    held: std::sync::RwLock<HashMap<PathBuf, Arc<Notify>>>,
    reads: AtomicUsize,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation. If test setup is wrong, then the
    /// test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let now = OffsetDateTime::now_utc();
        let mut map = BTreeMap::new();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            map.insert(validated, Stored { modified: now, data: data.into() });
        }
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(map),
            failing: std::sync::RwLock::new(HashSet::new()),
            held: std::sync::RwLock::new(HashMap::new()),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make every future write to `path` fail with a backend error.
    pub fn fail_writes_to(&self, path: impl AsRef<Path>) {
        if let Ok(mut failing) = self.failing.write() {
            failing.insert(path.as_ref().to_path_buf());
        }
    }

    /// Make reads of `path` wait for a notification on `gate`, one per read.
    pub fn hold_reads_of(&self, path: impl AsRef<Path>, gate: Arc<Notify>) {
        if let Ok(mut held) = self.held.write() {
            held.insert(path.as_ref().to_path_buf(), gate);
        }
    }

    /// Number of successful or failed [`read`](StorageBackend::read) calls so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Sorted snapshot of every stored path.
    pub async fn paths(&self) -> Vec<PathBuf> {
        self.storage.read().await.keys().cloned().collect()
    }

    fn should_fail(&self, path: &Path) -> bool {
        self.failing.read().map(|failing| failing.contains(path)).unwrap_or(false)
    }

    fn not_found(path: PathBuf) -> exn::Exn<ErrorKind> {
        exn::Exn::from(ErrorKind::NotFound(path))
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let prefix = match prefix.map(validate_path).transpose() {
            Ok(prefix) => prefix,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };
        Box::pin(stream! {
            // Snapshot under the lock; never hold it across a yield.
            let snapshot: Vec<FileInfo> = {
                let guard = self.storage.read().await;
                guard
                    .iter()
                    .filter(|(path, _)| prefix.as_ref().is_none_or(|pfx| path.starts_with(pfx)))
                    .map(|(path, stored)| FileInfo::new(path.clone(), stored.data.len() as u64, stored.modified))
                    .collect()
            };
            for info in snapshot {
                yield Ok(info);
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.storage.read().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let path = validate_path(path)?;
        let gate = self.held.read().ok().and_then(|held| held.get(&path).cloned());
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let guard = self.storage.read().await;
        guard.get(&path).map(|stored| stored.data.clone()).ok_or_else(|| Self::not_found(path))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        if self.should_fail(&path) {
            exn::bail!(ErrorKind::BackendError(format!("injected write failure: {}", path.display())));
        }
        let stored = Stored { modified: OffsetDateTime::now_utc(), data: data.to_vec() };
        self.storage.write().await.insert(path, stored);
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        self.storage.write().await.remove(&path).map(|_| ()).ok_or_else(|| Self::not_found(path))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = validate_path(from)?;
        let to = validate_path(to)?;
        let mut guard = self.storage.write().await;
        let stored = guard.remove(&from).ok_or_else(|| Self::not_found(from))?;
        guard.insert(to, stored);
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let stored = guard.get(&path).ok_or_else(|| Self::not_found(path.clone()))?;
        Ok(FileInfo::new(path.clone(), stored.data.len() as u64, stored.modified))
    }

    async fn set_modified(&self, path: &Path, modified: OffsetDateTime) -> Result<()> {
        let path = validate_path(path)?;
        let mut guard = self.storage.write().await;
        let stored = guard.get_mut(&path).ok_or_else(|| Self::not_found(path.clone()))?;
        stored.modified = modified;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[tokio::test]
    async fn test_write_and_read_counts() {
        let backend = MockBackend::default();
        backend.write(Path::new("Genesis.zip"), b"hello").await.unwrap();
        assert_eq!(backend.read(Path::new("Genesis.zip")).await.unwrap(), b"hello");
        assert!(backend.read(Path::new("missing.zip")).await.is_err());
        assert_eq!(backend.read_count(), 2);
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let backend = MockBackend::default();
        backend.fail_writes_to("Exodus.zip");
        backend.write(Path::new("Genesis.zip"), b"ok").await.unwrap();
        let err = backend.write(Path::new("Exodus.zip"), b"boom").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::BackendError(_)));
        assert_eq!(backend.paths().await, vec![PathBuf::from("Genesis.zip")]);
    }

    #[tokio::test]
    async fn test_rename_and_set_modified() {
        let backend = MockBackend::with_files([("Genesis.zip.part", b"data")]);
        backend.rename(Path::new("Genesis.zip.part"), Path::new("Genesis.zip")).await.unwrap();
        let stamp = datetime!(2020-01-01 00:00:00 UTC);
        backend.set_modified(Path::new("Genesis.zip"), stamp).await.unwrap();
        let info = backend.stat(Path::new("Genesis.zip")).await.unwrap();
        assert_eq!(info.modified, stamp);
        assert_eq!(info.size, 4);
        let err = backend.set_modified(Path::new("nope.zip"), stamp).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_prefix() {
        let backend = MockBackend::with_files([
            ("Genesis.zip", b"1".as_slice()),
            ("docs/Genesis_index.json", b"2".as_slice()),
            ("docsfile.json", b"3".as_slice()),
        ]);
        let docs = backend.list(Some(Path::new("docs"))).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path, Path::new("docs/Genesis_index.json"));
    }
}
