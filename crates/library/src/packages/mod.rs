//! Package tree resolution.
//!
//! The package manifest describes a tree of user-selectable packages rooted
//! at [`ROOT_PACKAGE`]. Every resolution pass builds the tree from scratch,
//! seeds it with the persisted selections and corrects them: a selection
//! covered by a selected ancestor is redundant and gets dropped, as do
//! selections naming packages the manifest no longer has.

pub mod error;
mod tree;

pub use self::tree::{Package, PackageTree};
use crate::packages::error::Result;
use folio_catalog::PackageDescriptor;
use std::collections::BTreeMap;

/// Name of the package every other package descends from. Selecting it
/// selects every known document.
pub const ROOT_PACKAGE: &str = "COMPLETE LIBRARY";

/// Persisted selections: package name to `true`.
///
/// `false` entries are tolerated when reading but never written.
pub type Selections = BTreeMap<String, bool>;

/// Outcome of one resolution pass.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub tree: PackageTree,
    /// The corrected selections.
    pub selections: Selections,
    /// `true` if `selections` differs from what was persisted and has to be
    /// written back.
    pub changed: bool,
}

/// Build the package tree from `manifest` and apply `persisted` selections.
///
/// ```
/// use folio_catalog::PackageDescriptor;
/// use folio_library::packages::{self, Selections};
///
/// let package = |name: &str, parent: Option<&str>| PackageDescriptor {
///     name: name.to_string(),
///     display_name: None,
///     parent: parent.map(str::to_string),
///     document_titles: vec![],
///     size: None,
/// };
/// let manifest = vec![package("COMPLETE LIBRARY", None), package("Tanakh", None)];
/// let persisted = Selections::from([("Tanakh".to_string(), true), ("Gone".to_string(), true)]);
///
/// let resolution = packages::resolve(manifest, &persisted).unwrap();
/// assert!(resolution.changed);
/// assert_eq!(resolution.selections, Selections::from([("Tanakh".to_string(), true)]));
/// ```
pub fn resolve(manifest: impl IntoIterator<Item = PackageDescriptor>, persisted: &Selections) -> Result<Resolution> {
    let mut tree = PackageTree::from_manifest(manifest)?;
    for (name, selected) in persisted {
        if !selected {
            continue;
        }
        if !tree.mark_selected(name) {
            tracing::debug!(package = %name, "dropping stale selection");
        }
    }
    tree.refresh_superseded();
    let selections = tree.selections();
    let changed = &selections != persisted;
    if changed {
        tracing::info!(before = persisted.len(), after = selections.len(), "corrected package selections");
    }
    Ok(Resolution { tree, selections, changed })
}

/// Decode persisted selections. Anything unreadable counts as no selection.
pub fn parse_selections(raw: Option<&str>) -> Selections {
    let Some(raw) = raw else {
        return Selections::new();
    };
    match serde_json::from_str(raw) {
        Ok(selections) => selections,
        Err(err) => {
            tracing::warn!(error = %err, "ignoring unreadable package selections");
            Selections::new()
        },
    }
}
