//! Archive Operations

use crate::Entry;
use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use std::fmt;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;
use tracing::instrument;
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::{CompressionMethod, ZipArchive};

type Keep = Box<dyn Fn(&Path) -> bool + Send>;

/// Files of a zip archive, decoded one at a time.
///
/// Only the central directory is read up front; each entry is decompressed
/// when the iterator reaches it, so memory use is bounded by the largest
/// entry rather than the whole archive. Directory entries are skipped.
/// Entry names that are absolute or climb out of the archive root with `..`
/// yield [`UnsafePath`](ErrorKind::UnsafePath) rather than being silently
/// dropped.
///
/// # Examples
///
/// ```
/// use std::io::Cursor;
///
/// let bundle = folio_archive::pack([("Genesis_index.json", b"{}")]).unwrap();
/// let entries: Vec<_> = folio_archive::Entries::new(Cursor::new(bundle))
///     .unwrap()
///     .collect::<Result<_, _>>()
///     .unwrap();
/// assert_eq!(entries.len(), 1);
/// assert_eq!(entries[0].data, b"{}");
/// ```
pub struct Entries<R> {
    archive: ZipArchive<R>,
    next: usize,
    keep: Option<Keep>,
}

impl<R: Read + Seek> Entries<R> {
    /// Open an archive, checking its signature and central directory.
    #[instrument(skip(reader))]
    pub fn new(mut reader: R) -> Result<Self> {
        let mut head = Vec::with_capacity(4);
        reader.by_ref().take(4).read_to_end(&mut head).or_raise(|| ErrorKind::Io)?;
        if !crate::is_archive(&head) {
            exn::bail!(ErrorKind::InvalidData);
        }
        reader.rewind().or_raise(|| ErrorKind::Io)?;
        let archive = ZipArchive::new(reader).or_raise(|| ErrorKind::InvalidData)?;
        tracing::trace!(entries = archive.len(), "archive opened");
        Ok(Self { archive, next: 0, keep: None })
    }

    /// Only decode entries whose path `keep` accepts. Rejected entries are
    /// never decompressed.
    pub fn retain(mut self, keep: impl Fn(&Path) -> bool + Send + 'static) -> Self {
        self.keep = Some(Box::new(keep));
        self
    }

    /// Number of records in the central directory, directories included.
    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.len() == 0
    }

    fn decode(&mut self, index: usize) -> Result<Option<Entry>> {
        let mut file = self.archive.by_index(index).or_raise(|| ErrorKind::InvalidData)?;
        if file.is_dir() {
            return Ok(None);
        }
        let path = file.enclosed_name().ok_or_raise(|| ErrorKind::UnsafePath(file.name().to_string()))?;
        if let Some(keep) = &self.keep
            && !keep(&path)
        {
            return Ok(None);
        }
        let mut data = Vec::new();
        file.read_to_end(&mut data).or_raise(|| ErrorKind::InvalidData)?;
        Ok(Some(Entry { path, data }))
    }
}

impl<R: Read + Seek> Iterator for Entries<R> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.archive.len() {
            let index = self.next;
            self.next += 1;
            if let Some(decoded) = self.decode(index).transpose() {
                return Some(decoded);
            }
        }
        None
    }
}

impl<R: Read + Seek> fmt::Debug for Entries<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entries")
            .field("entries", &self.archive.len())
            .field("next", &self.next)
            .field("filtered", &self.keep.is_some())
            .finish()
    }
}

/// Build a deflate-compressed archive in memory, entries in iteration order.
pub fn pack<N, D>(entries: impl IntoIterator<Item = (N, D)>) -> Result<Vec<u8>>
where
    N: AsRef<str>,
    D: AsRef<[u8]>,
{
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in entries {
        writer.start_file(name.as_ref(), options).or_raise(|| ErrorKind::Io)?;
        writer.write_all(data.as_ref()).or_raise(|| ErrorKind::Io)?;
    }
    Ok(writer.finish().or_raise(|| ErrorKind::Io)?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::{Seek, SeekFrom};

    fn unpack(input: &[u8]) -> Result<Vec<Entry>> {
        Entries::new(Cursor::new(input))?.collect()
    }

    #[test]
    fn unpack_preserves_order_and_nesting() {
        let bundle = pack([
            ("Genesis.zip", b"first".as_slice()),
            ("nested/Exodus.zip", b"second".as_slice()),
        ])
        .unwrap();
        let entries = unpack(&bundle).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, Path::new("Genesis.zip"));
        assert_eq!(entries[0].data, b"first");
        assert_eq!(entries[1].path, Path::new("nested/Exodus.zip"));
        assert_eq!(entries[1].data, b"second");
    }

    #[test]
    fn unpack_skips_directories() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.add_directory("dir/", SimpleFileOptions::default()).unwrap();
        writer.start_file("dir/file.json", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"[]").unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        let entries = unpack(&bytes).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, Path::new("dir/file.json"));
    }

    #[test]
    fn unpack_rejects_traversal() {
        let bundle = pack([("../escape.json", b"{}".as_slice())]).unwrap();
        let err = unpack(&bundle).unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsafePath(name) if name == "../escape.json"));
    }

    #[rstest]
    #[case::empty(b"".as_slice())]
    #[case::html(b"<!DOCTYPE html><p>Bad Gateway</p>".as_slice())]
    #[case::signature_only(b"PK\x03\x04garbage".as_slice())]
    fn unpack_rejects_invalid(#[case] input: &[u8]) {
        let err = unpack(input).unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidData);
    }

    #[test]
    fn unpack_rejects_truncated() {
        let bundle = pack([("Genesis.zip", vec![7u8; 4096])]).unwrap();
        let truncated = &bundle[..bundle.len() / 2];
        assert!(unpack(truncated).is_err());
    }

    #[test]
    fn entries_decode_lazily_from_a_file() {
        let bundle = pack([
            ("Genesis.zip", b"genesis".as_slice()),
            ("packages.json", b"[]".as_slice()),
            ("Exodus.zip", b"exodus".as_slice()),
        ])
        .unwrap();
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&bundle).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();

        let mut entries = Entries::new(file).unwrap().retain(|path| path.extension().is_some_and(|ext| ext == "zip"));
        assert_eq!(entries.len(), 3);
        let first = entries.next().unwrap().unwrap();
        assert_eq!(first.path, Path::new("Genesis.zip"));
        let second = entries.next().unwrap().unwrap();
        assert_eq!(second.path, Path::new("Exodus.zip"));
        assert_eq!(second.data, b"exodus");
        assert!(entries.next().is_none());
    }
}
