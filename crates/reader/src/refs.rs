//! Reference string helpers and the naming scheme of unpacked files.
//!
//! A reference looks like `Genesis 1:3` or `Rashi on Genesis 1:1:2`. Files in
//! the documents tree are keyed by the *stem*, the reference cut at its first
//! colon, so one file holds one section (or, for deeper texts, a set of
//! sections under a `sections` object).

use crate::models::Language;
use md5::{Digest, Md5};
use regex::Regex;
use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::LazyLock;

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        pub(crate) static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

// Two trailing numbers separated by a space, as in `Rashi on Genesis 1 2`.
regex!(TRAILING_PAIR_REGEX, r"(\d+) (\d+)$");
// Segment suffix of a reference: `3` or `3-7`.
regex!(SEGMENT_RANGE_REGEX, r"^(\d+)(?:-(\d+))?$");

/// The reference up to its first colon.
///
/// ```
/// assert_eq!(folio_reader::refs::stem("Genesis 1:3"), "Genesis 1");
/// assert_eq!(folio_reader::refs::stem("Rashi on Genesis 1:1:2"), "Rashi on Genesis 1");
/// assert_eq!(folio_reader::refs::stem("Genesis 1"), "Genesis 1");
/// ```
pub fn stem(reference: &str) -> &str {
    reference.split_once(':').map_or(reference, |(stem, _)| stem)
}

/// The stem with its last space separated word removed, used for texts
/// stored one level up (`Tomer Devorah 5` lives in `Tomer Devorah`).
pub fn depth_one_stem(stem: &str) -> Option<&str> {
    stem.rsplit_once(' ').map(|(head, _)| head).filter(|head| !head.is_empty())
}

/// Rewrites a trailing `N M` into `N:M`.
pub fn with_missing_colon(reference: &str) -> Cow<'_, str> {
    TRAILING_PAIR_REGEX.replace(reference, "${1}:${2}")
}

/// Path of the text of one version of one section.
///
/// The version title is hashed so that arbitrary titles map to safe file
/// names: `<stem>.<first 8 hex chars of md5(title)>.<lang>.json`.
///
/// ```
/// use folio_reader::{models::Language, refs::section_file_path};
/// assert_eq!(
///     section_file_path("Genesis 1", Language::En, "The Koren Jerusalem Bible"),
///     std::path::PathBuf::from("Genesis 1.9d535d52.en.json"),
/// );
/// ```
pub fn section_file_path(stem: &str, language: Language, version_title: &str) -> PathBuf {
    let digest = hex::encode(Md5::digest(version_title.as_bytes()));
    PathBuf::from(format!("{stem}.{}.{language}.json", &digest[..8]))
}

pub fn metadata_path(stem: &str) -> PathBuf {
    PathBuf::from(format!("{stem}.metadata.json"))
}

/// Monolithic section file written by older exports, text and links inline.
pub fn legacy_path(stem: &str) -> PathBuf {
    PathBuf::from(format!("{stem}.json"))
}

/// Table of contents of a title; its presence marks the title as unpacked.
pub fn index_path(title: &str) -> PathBuf {
    PathBuf::from(format!("{title}_index.json"))
}

pub fn archive_path(title: &str) -> PathBuf {
    PathBuf::from(format!("{title}.zip"))
}

/// Inclusive, 1-based segment bounds of a suffix such as `3` or `3-7`.
pub(crate) fn segment_range(suffix: &str) -> Option<(usize, usize)> {
    let captures = SEGMENT_RANGE_REGEX.captures(suffix.trim())?;
    let start: usize = captures.get(1)?.as_str().parse().ok()?;
    let end = match captures.get(2) {
        Some(end) => end.as_str().parse().ok()?,
        None => start,
    };
    Some((start, end.max(start)))
}
