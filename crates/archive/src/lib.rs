//! Zip archive handling for the offline library.
//!
//! Two kinds of archive pass through this crate: the bundle returned by the
//! remote catalog (a zip of per-document zips) and the per-document archive
//! itself (a zip of JSON fragments). Both are read through [`Entries`], which
//! decodes one entry at a time from any seekable reader, so a bundle of
//! several gigabytes can be extracted straight from the file it was
//! downloaded to.

pub mod error;
mod ops;

pub use crate::ops::{Entries, pack};
use std::path::PathBuf;

/// Local file header signature of a non-empty zip.
const MAGIC_BYTES: &[u8] = b"PK\x03\x04";
/// End of central directory signature, which is all an empty zip contains.
const EMPTY_MAGIC_BYTES: &[u8] = b"PK\x05\x06";

/// A single file decoded from an archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    /// Relative path inside the archive. Never absolute and never contains
    /// `..` components.
    pub path: PathBuf,
    pub data: Vec<u8>,
}

/// Check the leading bytes of a payload for a zip signature.
///
/// # Examples
///
/// ```
/// assert!(folio_archive::is_archive(b"PK\x03\x04rest-of-file"));
/// assert!(!folio_archive::is_archive(b"<!DOCTYPE html>"));
/// ```
pub fn is_archive(head: &[u8]) -> bool {
    head.starts_with(MAGIC_BYTES) || head.starts_with(EMPTY_MAGIC_BYTES)
}
