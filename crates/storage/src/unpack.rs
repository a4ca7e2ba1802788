//! Staged extraction of archives into a backend.

use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use exn::ResultExt;
use folio_archive::{Entries, Entry};
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::instrument;

const STAGING_SUFFIX: &str = ".part";

fn staged(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

/// Extract an in-memory archive below `prefix` in `backend`.
///
/// See [`unpack_file_into`] for the staging guarantees.
#[instrument(skip(backend, archive), fields(backend = backend.name(), archive_size = archive.len()))]
pub async fn unpack_into(backend: &dyn StorageBackend, archive: Vec<u8>, prefix: Option<&Path>) -> Result<Vec<PathBuf>> {
    extract(backend, prefix, move || Entries::new(Cursor::new(archive)).map_err(ErrorKind::archive)).await
}

/// Extract the archive at the local path `source` below `prefix` in
/// `backend`, skipping entries `keep` rejects.
///
/// Entries are decoded one at a time on the blocking pool and written under
/// a `.part` name as they arrive. Only once every entry has been written are
/// the staged files renamed into place. On failure the staged files are
/// removed on a best effort basis, so an existing file is never replaced by
/// a partial one.
///
/// Returns the final paths of the extracted entries, in archive order.
#[instrument(skip(backend, keep), fields(backend = backend.name(), source = %source.display()))]
pub async fn unpack_file_into(
    backend: &dyn StorageBackend,
    source: &Path,
    prefix: Option<&Path>,
    keep: impl Fn(&Path) -> bool + Send + 'static,
) -> Result<Vec<PathBuf>> {
    let source = source.to_path_buf();
    extract(backend, prefix, move || {
        let file = File::open(&source).map_err(ErrorKind::Io)?;
        let entries = Entries::new(BufReader::new(file)).map_err(ErrorKind::archive)?;
        Ok(entries.retain(keep))
    })
    .await
}

async fn extract<R, F>(backend: &dyn StorageBackend, prefix: Option<&Path>, open: F) -> Result<Vec<PathBuf>>
where
    R: Read + Seek + 'static,
    F: FnOnce() -> Result<Entries<R>> + Send + 'static,
{
    // One decoded entry in flight keeps memory bounded by the largest entry.
    let (sender, mut receiver) = mpsc::channel::<Result<Entry>>(1);
    let decoder = tokio::task::spawn_blocking(move || {
        let entries = match open() {
            Ok(entries) => entries,
            Err(err) => {
                let _ = sender.blocking_send(Err(err));
                return;
            },
        };
        for entry in entries {
            let entry = entry.map_err(ErrorKind::archive);
            let failed = entry.is_err();
            if sender.blocking_send(entry).is_err() || failed {
                return;
            }
        }
    });

    let mut written: Vec<PathBuf> = Vec::new();
    let mut targets: Vec<PathBuf> = Vec::new();
    let staging: Result<()> = async {
        while let Some(entry) = receiver.recv().await {
            let entry = entry?;
            let target = match prefix {
                Some(prefix) => validate_path(prefix.join(&entry.path))?,
                None => validate_path(&entry.path)?,
            };
            let part = staged(&target);
            backend.write(&part, &entry.data).await?;
            written.push(part);
            targets.push(target);
        }
        Ok(())
    }
    .await;
    drop(receiver);
    let decoded = decoder
        .await
        .or_raise(|| ErrorKind::BackendError("archive decoding task did not complete".to_string()));
    if let Err(err) = staging.and(decoded) {
        discard(backend, &written).await;
        return Err(err);
    }

    for (index, target) in targets.iter().enumerate() {
        if let Err(err) = backend.rename(&written[index], target).await {
            discard(backend, &written[index..]).await;
            return Err(err);
        }
    }
    tracing::debug!(entries = targets.len(), "archive extracted");
    Ok(targets)
}

async fn discard(backend: &dyn StorageBackend, paths: &[PathBuf]) {
    for path in paths {
        if let Err(err) = backend.delete(path).await {
            tracing::warn!(path = %path.display(), "could not remove staged file: {err}");
        }
    }
}
