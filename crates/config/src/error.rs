//! Config Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A config error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for config operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No home directory to derive default paths from.
    #[display("could not determine default directories")]
    NoProjectDirs,
    /// Sources could not be merged or deserialized.
    #[display("invalid configuration")]
    Extract,
    /// A directory setting must be absolute.
    #[display("path must be absolute: {}", _0.display())]
    RelativePath(#[error(not(source))] PathBuf),
    /// A numeric setting is out of range.
    #[display("invalid value for {_0}")]
    InvalidValue(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
