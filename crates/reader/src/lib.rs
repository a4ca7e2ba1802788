//! Offline text reader.
//!
//! [`ContentCache`] answers "give me `Genesis 1:3` in these versions" from
//! the offline library: it finds the title owning the ref, unpacks the
//! title's archive into the documents tree on first use, and assembles the
//! section from the unpacked metadata and per-version text files. Callers
//! that get [`MissingOfflineData`](error::ErrorKind::MissingOfflineData)
//! back are expected to fetch the text from the network instead.

mod assemble;
mod cache;
pub mod error;
pub mod models;
pub mod refs;

pub use crate::cache::ContentCache;
pub use crate::models::{Language, RefText, Section, SectionSource, Segment, VersionInfo, VersionSelection};
