//! Library Error Types
//!
//! Module-level failures ([`packages`](crate::packages),
//! [`plan`](crate::plan), [`download`](crate::download)) are raised into
//! these kinds at the [`Library`](crate::Library) boundary, so the full
//! error tree is kept.

use derive_more::{Display, Error};

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The package manifest could not be turned into a package tree.
    #[display("invalid package configuration")]
    Packages,
    #[display("could not compute the sync plan")]
    Plan,
    #[display("bundle download failed")]
    Download,
    /// A manifest the library needs has never been downloaded.
    #[display("manifest {_0} is not available locally; check for updates first")]
    MissingManifest(#[error(not(source))] &'static str),
    /// A manifest on disk or from the server is not valid JSON of the
    /// expected shape.
    #[display("manifest {_0} is malformed")]
    MalformedManifest(#[error(not(source))] &'static str),
    #[display("remote catalog request failed")]
    Catalog,
    #[display("durable state could not be read or written")]
    State,
    #[display("archive storage failed")]
    Storage,
    #[display("could not clean the temporary directory")]
    TempDirectory,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Catalog | Self::Download)
    }
}
