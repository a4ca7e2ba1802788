//! Error types for the [`plan`](super) module.

use derive_more::{Display, Error};

/// A planning error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for planning.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Local archives could not be listed.
    #[display("could not list local archives")]
    Storage,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage)
    }
}
