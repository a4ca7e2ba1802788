//! Offline library synchronization.
//!
//! Works out which documents the user wants available offline from their
//! package selections ([`packages`]), reconciles that with what is on disk
//! and what the server reports as current ([`plan`]), and fetches the
//! difference as a single bundle ([`download`]). [`Library`] ties these
//! together with the durable state and the archive store.

pub mod download;
pub mod error;
mod library;
pub mod packages;
pub mod plan;

pub use crate::library::{Library, LibraryState, SyncReport, UpdateCheck};

/// Upper bound for concurrent archive deletions.
pub(crate) const MAX_DELETE_CONCURRENCY: usize = 50;
