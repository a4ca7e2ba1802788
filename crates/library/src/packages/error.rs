//! Error types for the [`packages`](super) module.

use derive_more::{Display, Error};

/// A package resolution error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for package resolution.
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors are fatal for a resolution pass: the manifest has to
/// be fixed (or re-downloaded) before anything can be planned.
///
/// ### Configuration Errors
/// - [`ErrorKind::OrphanedPackage`]
/// - [`ErrorKind::MissingRoot`]
/// - [`ErrorKind::DuplicatePackage`]
/// - [`ErrorKind::Cycle`]
///
/// ### Selection Errors
/// - [`ErrorKind::UnknownPackage`]
/// - [`ErrorKind::Superseded`]
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("package {package:?} names unknown parent {parent:?}")]
    OrphanedPackage { package: String, parent: String },
    #[display("manifest has no {:?} package", super::ROOT_PACKAGE)]
    MissingRoot,
    #[display("package {_0:?} is listed more than once")]
    DuplicatePackage(#[error(not(source))] String),
    /// The package is not reachable from the root, so its parent chain loops.
    #[display("package {_0:?} is part of a parent cycle")]
    Cycle(#[error(not(source))] String),
    #[display("no package named {_0:?}")]
    UnknownPackage(#[error(not(source))] String),
    /// An ancestor is selected, so the package cannot be deselected alone.
    #[display("package {_0:?} is covered by a selected ancestor")]
    Superseded(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
