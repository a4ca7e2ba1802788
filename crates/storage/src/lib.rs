//! Storage backends for the offline library.
//!
//! The library keeps two trees: the archive store (one `<title>.zip` per
//! document) and the documents tree those archives get unpacked into. Both
//! are accessed through [`StorageBackend`] so the sync and reader crates can
//! run against [`LocalBackend`](backend::LocalBackend) in production and an
//! in-memory backend in tests.

pub mod backend;
pub mod error;
mod models;
mod path;
mod unpack;

pub use crate::backend::StorageBackend;
pub use crate::models::FileInfo;
pub use crate::path::validate as validate_path;
pub use crate::unpack::{unpack_file_into, unpack_into};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
