//! Reader Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A reader error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for reader operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Nothing usable is stored offline for the reference; the caller should
    /// go to the network instead.
    #[display("no offline data for {_0:?}")]
    MissingOfflineData(#[error(not(source))] String),
    /// The offline file exists but does not contain the requested section.
    #[display("cannot extract section {_0:?} from offline data")]
    CannotExtractSection(#[error(not(source))] String),
    /// An offline file exists but is not valid JSON of the expected shape.
    #[display("corrupt offline file: {}", _0.display())]
    CorruptFile(#[error(not(source))] PathBuf),
    /// Version language is not one of the supported slots.
    #[display("unsupported language: {_0:?}")]
    UnknownLanguage(#[error(not(source))] String),
    /// Storage backend failed.
    #[display("storage error")]
    Storage,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage)
    }

    /// Returns `true` if the caller should fall back to fetching the text
    /// from the network.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::MissingOfflineData(_))
    }
}
