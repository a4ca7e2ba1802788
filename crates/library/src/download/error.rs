//! Error types for the [`download`](super) module.

use derive_more::{Display, Error};

/// A download error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for downloads.
pub type Result<T> = std::result::Result<T, Error>;

/// ### Discipline Errors
/// - [`ErrorKind::AlreadyInProgress`]
/// - [`ErrorKind::NotDownloading`]
///
/// ### Transfer Errors
/// - [`ErrorKind::BundleNotReady`]
/// - [`ErrorKind::EmptyBundle`]
/// - [`ErrorKind::Cancelled`]
///
/// ### Dependency Errors
/// - [`ErrorKind::Catalog`]
/// - [`ErrorKind::TempFile`]
/// - [`ErrorKind::Storage`]
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("download already in progress")]
    AlreadyInProgress,
    #[display("no download in progress")]
    NotDownloading,
    /// The server was still preparing the bundle after every attempt.
    #[display("bundle still not ready after {_0} requests")]
    BundleNotReady(#[error(not(source))] u32),
    #[display("server returned a bundle without any download location")]
    EmptyBundle,
    #[display("download cancelled")]
    Cancelled,
    #[display("catalog request failed")]
    Catalog,
    /// The bundle could not be written to, or read back from, the temporary
    /// directory.
    #[display("temporary bundle file failed")]
    TempFile,
    /// Extracting the bundle into the archive store failed.
    #[display("could not extract bundle into the library")]
    Storage,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BundleNotReady(_) | Self::Catalog | Self::TempFile)
    }
}
