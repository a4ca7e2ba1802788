//! Local filesystem storage backend.

use crate::backend::FileInfoStream;
use crate::error::{ErrorKind, Result};
use crate::{FileInfo, StorageBackend, path::validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use time::OffsetDateTime;
use tokio::fs::{self, DirEntry};

enum WalkEntry {
    File(FileInfo),
    Descend(PathBuf),
    Skip,
}

/// Local filesystem storage backend, rooted at an absolute directory.
///
/// ```no_run
/// use folio_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let library = LocalBackend::new("library", "/var/lib/folio/library")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    root: PathBuf,
}
impl LocalBackend {
    /// Create a backend rooted at `root`, creating the directory if missing.
    ///
    /// # Errors
    /// [`InvalidPath`](ErrorKind::InvalidPath) if `root` is relative or is
    /// an existing non-directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Constructors stay sync; this only happens once per backend.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        Ok(Self { name: name.into(), root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        Ok(self.root.join(validate_path(path.as_ref())?))
    }

    fn relative_path(&self, absolute: &Path) -> Result<PathBuf> {
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::BackendError(format!("path `{}` is not within root `{}`", absolute.display(), self.root.display()))
        })?;
        validate_path(relative)
    }

    fn file_info(path: &Path, metadata: &Metadata) -> Result<FileInfo> {
        let modified: OffsetDateTime = metadata.modified().map_err(ErrorKind::Io)?.into();
        Ok(FileInfo::new(path, metadata.len(), modified))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    /// Classify one directory entry. Lives outside the stream so `?` works.
    async fn walk_entry(&self, entry: DirEntry, prefix: Option<&Path>) -> Result<WalkEntry> {
        let path = entry.path();
        let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, &path))?;
        let relative = self.relative_path(&path)?;
        if metadata.is_dir() {
            // Keep descending while the directory could still contain a match.
            let could_match = prefix.is_none_or(|pfx| pfx.starts_with(&relative) || relative.starts_with(pfx));
            return Ok(if could_match { WalkEntry::Descend(path) } else { WalkEntry::Skip });
        }
        if !metadata.is_file() || prefix.is_some_and(|pfx| !relative.starts_with(pfx)) {
            // Broken symlinks, sockets and non-matching files.
            return Ok(WalkEntry::Skip);
        }
        Ok(WalkEntry::File(Self::file_info(&relative, &metadata)?))
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let prefix = match prefix.map(validate_path).transpose() {
            Ok(prefix) => prefix,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };
        Box::pin(stream! {
            let mut pending = vec![self.root.clone()];
            while let Some(dir) = pending.pop() {
                let mut entries = match fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    // A directory that doesn't exist lists as empty.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::map_io_error(err, &dir)));
                        continue;
                    }
                };
                loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break,
                        Err(err) => {
                            yield Err(exn::Exn::from(Self::map_io_error(err, &dir)));
                            break;
                        }
                    };
                    match self.walk_entry(entry, prefix.as_deref()).await {
                        Ok(WalkEntry::File(info)) => yield Ok(info),
                        Ok(WalkEntry::Descend(sub)) => pending.push(sub),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    }
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::try_exists(&abs_path).await.map_err(ErrorKind::Io)?)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::read(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, path))?;
        }
        Ok(fs::write(&abs_path, data).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::remove_file(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from_path = self.absolute_path(from)?;
        let to_path = self.absolute_path(to)?;
        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, to))?;
        }
        Ok(fs::rename(&from_path, &to_path).await.map_err(|e| Self::map_io_error(e, from))?)
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let abs_path = self.absolute_path(path)?;
        let metadata = fs::metadata(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Self::file_info(&validate_path(path)?, &metadata)
    }

    async fn set_modified(&self, path: &Path, modified: OffsetDateTime) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        let modified = SystemTime::from(modified);
        let outcome = tokio::task::spawn_blocking(move || {
            std::fs::File::options().write(true).open(&abs_path)?.set_modified(modified)
        })
        .await
        .or_raise(|| ErrorKind::BackendError("set_modified task did not complete".to_string()))?;
        Ok(outcome.map_err(|e| Self::map_io_error(e, path))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn backend() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("library", dir.path()).unwrap();
        (dir, backend)
    }

    #[test]
    fn test_new_requires_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LocalBackend::new("library", dir.path()).is_ok());
        assert!(LocalBackend::new("library", "relative/path").is_err());
    }

    #[test]
    fn test_new_creates_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("library");
        LocalBackend::new("library", &root).unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn test_paths_stay_within_root() {
        let (dir, backend) = backend();
        assert_eq!(backend.absolute_path("Genesis.zip").unwrap(), dir.path().join("Genesis.zip"));
        assert!(backend.absolute_path("../Genesis.zip").is_err());
        assert!(backend.relative_path(Path::new("/elsewhere/Genesis.zip")).is_err());
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let (_dir, backend) = backend();
        backend.write(Path::new("a/b/Genesis.zip"), b"zip").await.unwrap();
        assert_eq!(backend.read(Path::new("a/b/Genesis.zip")).await.unwrap(), b"zip");
        backend.delete(Path::new("a/b/Genesis.zip")).await.unwrap();
        assert!(!backend.exists(Path::new("a/b/Genesis.zip")).await.unwrap());
        let err = backend.delete(Path::new("a/b/Genesis.zip")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rename_overwrites() {
        let (_dir, backend) = backend();
        backend.write(Path::new("Genesis.zip.part"), b"new").await.unwrap();
        backend.write(Path::new("Genesis.zip"), b"old").await.unwrap();
        backend.rename(Path::new("Genesis.zip.part"), Path::new("Genesis.zip")).await.unwrap();
        assert_eq!(backend.read(Path::new("Genesis.zip")).await.unwrap(), b"new");
        assert!(!backend.exists(Path::new("Genesis.zip.part")).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_recursive_and_prefix() {
        let (_dir, backend) = backend();
        backend.write(Path::new("Genesis.zip"), b"1").await.unwrap();
        backend.write(Path::new("Exodus.zip"), b"2").await.unwrap();
        backend.write(Path::new("tmp/bundle.zip"), b"3").await.unwrap();
        backend.write(Path::new("tmpfile.zip"), b"4").await.unwrap();
        assert_eq!(backend.list(None).await.unwrap().len(), 4);
        let tmp = backend.list(Some(Path::new("tmp"))).await.unwrap();
        assert_eq!(tmp.len(), 1);
        assert_eq!(tmp[0].path, Path::new("tmp/bundle.zip"));
        assert!(backend.list(Some(Path::new("missing/"))).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stat_and_set_modified() {
        let (_dir, backend) = backend();
        backend.write(Path::new("Genesis.zip"), b"12345").await.unwrap();
        let stamp = datetime!(2024-03-01 12:00:00 UTC);
        backend.set_modified(Path::new("Genesis.zip"), stamp).await.unwrap();
        let info = backend.stat(Path::new("Genesis.zip")).await.unwrap();
        assert_eq!(info.path, Path::new("Genesis.zip"));
        assert_eq!(info.size, 5);
        assert_eq!(info.modified, stamp);
    }

    #[tokio::test]
    async fn test_set_modified_missing_file() {
        let (_dir, backend) = backend();
        let err = backend.set_modified(Path::new("nope.zip"), OffsetDateTime::UNIX_EPOCH).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_path_security() {
        let (_dir, backend) = backend();
        assert!(backend.read(Path::new("../etc/passwd")).await.is_err());
        assert!(backend.write(Path::new("../escape"), b"x").await.is_err());
        assert!(backend.delete(Path::new("a/../../escape")).await.is_err());
    }
}
