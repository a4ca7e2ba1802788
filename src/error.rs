//! CLI Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    /// Storage, state database or catalog client could not be opened.
    #[display("could not open {_0}")]
    Setup(#[error(not(source))] &'static str),
    #[display("library operation failed")]
    Library,
    #[display("could not read {_0:?} offline")]
    Read(#[error(not(source))] String),
    #[display("invalid --version argument {_0:?}, expected LANG=TITLE")]
    InvalidVersion(#[error(not(source))] String),
}
