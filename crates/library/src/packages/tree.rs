use crate::packages::ROOT_PACKAGE;
use crate::packages::Selections;
use crate::packages::error::{ErrorKind, Result};
use exn::OptionExt;
use folio_catalog::PackageDescriptor;
use std::collections::{BTreeMap, BTreeSet};

/// A node of the package tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub display_name: Option<String>,
    /// `None` only for the root.
    pub parent: Option<String>,
    /// Child package names, in manifest order.
    pub children: Vec<String>,
    pub document_titles: Vec<String>,
    /// Advisory download size in bytes.
    pub size: Option<u64>,
    pub selected: bool,
    /// Some strict ancestor is selected.
    pub superseded_by_parent: bool,
}

impl Package {
    /// Selected and not already covered by an ancestor.
    pub fn is_effectively_selected(&self) -> bool {
        self.selected && !self.superseded_by_parent
    }
}

/// Package arena keyed by name.
///
/// Always a tree: built with [`from_manifest`](Self::from_manifest), which
/// rejects anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageTree {
    packages: BTreeMap<String, Package>,
    order: Vec<String>,
}

impl PackageTree {
    /// Build the tree in two passes: collect every package, then back-fill
    /// child lists from the `parent` declarations.
    pub fn from_manifest(manifest: impl IntoIterator<Item = PackageDescriptor>) -> Result<Self> {
        let mut packages = BTreeMap::new();
        let mut order = Vec::new();
        for descriptor in manifest {
            let name = descriptor.name;
            let parent = match descriptor.parent.filter(|parent| !parent.is_empty()) {
                _ if name == ROOT_PACKAGE => None,
                Some(parent) => Some(parent),
                None => Some(ROOT_PACKAGE.to_string()),
            };
            let package = Package {
                name: name.clone(),
                display_name: descriptor.display_name,
                parent,
                children: Vec::new(),
                document_titles: descriptor.document_titles,
                size: descriptor.size,
                selected: false,
                superseded_by_parent: false,
            };
            if packages.insert(name.clone(), package).is_some() {
                exn::bail!(ErrorKind::DuplicatePackage(name));
            }
            order.push(name);
        }
        if !packages.contains_key(ROOT_PACKAGE) {
            exn::bail!(ErrorKind::MissingRoot);
        }

        for name in &order {
            let Some(parent) = packages.get(name).and_then(|package| package.parent.clone()) else {
                continue;
            };
            match packages.get_mut(&parent) {
                Some(parent) => parent.children.push(name.clone()),
                None => exn::bail!(ErrorKind::OrphanedPackage { package: name.clone(), parent }),
            }
        }

        let tree = Self { packages, order };
        // Every package has exactly one existing parent at this point, so
        // anything the root cannot reach sits on a loop.
        let mut reachable: BTreeSet<&str> = tree.descendants(ROOT_PACKAGE).into_iter().collect();
        reachable.insert(ROOT_PACKAGE);
        if let Some(looped) = tree.order.iter().find(|name| !reachable.contains(name.as_str())) {
            exn::bail!(ErrorKind::Cycle(looped.clone()));
        }
        Ok(tree)
    }

    pub fn root(&self) -> &Package {
        // Presence is checked when the tree is built.
        &self.packages[ROOT_PACKAGE]
    }

    pub fn get(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    /// Packages in manifest order.
    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.order.iter().filter_map(|name| self.packages.get(name))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Names of every package below `name`, depth first.
    pub fn descendants(&self, name: &str) -> Vec<&str> {
        let mut found = Vec::new();
        let mut stack: Vec<&str> = match self.packages.get(name) {
            Some(package) => package.children.iter().rev().map(String::as_str).collect(),
            None => return found,
        };
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            found.push(current);
            if let Some(package) = self.packages.get(current) {
                stack.extend(package.children.iter().rev().map(String::as_str));
            }
        }
        found
    }

    /// Number of ancestors of `name`; the root has depth 0.
    pub fn depth(&self, name: &str) -> usize {
        let mut depth = 0;
        let mut current = self.packages.get(name).and_then(|package| package.parent.as_deref());
        while let Some(parent) = current {
            depth += 1;
            current = self.packages.get(parent).and_then(|package| package.parent.as_deref());
        }
        depth
    }

    /// Set `selected` without touching the superseded flags. Returns `false`
    /// for unknown packages.
    pub(crate) fn mark_selected(&mut self, name: &str) -> bool {
        match self.packages.get_mut(name) {
            Some(package) => {
                package.selected = true;
                true
            },
            None => false,
        }
    }

    /// Recompute `superseded_by_parent` from the root down, clearing the
    /// selection of every package an ancestor already covers.
    pub(crate) fn refresh_superseded(&mut self) {
        let mut stack = vec![(ROOT_PACKAGE.to_string(), false)];
        while let Some((name, covered)) = stack.pop() {
            let Some(package) = self.packages.get_mut(&name) else {
                continue;
            };
            package.superseded_by_parent = covered;
            if covered {
                package.selected = false;
            }
            let covered = covered || package.selected;
            stack.extend(package.children.iter().map(|child| (child.clone(), covered)));
        }
    }

    /// Select `name`. Descendants lose their own selections since the new
    /// one covers them.
    pub fn select(&mut self, name: &str) -> Result<()> {
        if !self.mark_selected(name) {
            exn::bail!(ErrorKind::UnknownPackage(name.to_string()));
        }
        self.refresh_superseded();
        Ok(())
    }

    /// Deselect `name` together with every descendant.
    ///
    /// Fails with [`ErrorKind::Superseded`] if an ancestor is selected: the
    /// package stays covered no matter what.
    pub fn deselect(&mut self, name: &str) -> Result<()> {
        let package = self.packages.get(name).ok_or_raise(|| ErrorKind::UnknownPackage(name.to_string()))?;
        if package.superseded_by_parent {
            exn::bail!(ErrorKind::Superseded(name.to_string()));
        }
        let mut affected: Vec<String> = self.descendants(name).into_iter().map(str::to_string).collect();
        affected.push(name.to_string());
        for name in affected {
            if let Some(package) = self.packages.get_mut(&name) {
                package.selected = false;
            }
        }
        self.refresh_superseded();
        Ok(())
    }

    /// Selections worth persisting.
    pub fn selections(&self) -> Selections {
        self.packages
            .values()
            .filter(|package| package.is_effectively_selected())
            .map(|package| (package.name.clone(), true))
            .collect()
    }

    pub fn any_selected(&self) -> bool {
        self.packages.values().any(|package| package.selected)
    }

    /// Every document title named by any package.
    pub fn all_titles(&self) -> BTreeSet<String> {
        self.packages.values().flat_map(|package| package.document_titles.iter().cloned()).collect()
    }

    /// Documents of `name`. The root owns `all_books`.
    pub fn titles_of<'a>(&'a self, name: &str, all_books: &'a BTreeSet<String>) -> BTreeSet<&'a str> {
        if name == ROOT_PACKAGE {
            return all_books.iter().map(String::as_str).collect();
        }
        self.packages
            .get(name)
            .map(|package| package.document_titles.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Documents that belong to at least one effectively selected package.
    pub fn desired_titles(&self, all_books: &BTreeSet<String>) -> BTreeSet<String> {
        let mut desired = BTreeSet::new();
        for package in self.packages.values().filter(|package| package.is_effectively_selected()) {
            desired.extend(self.titles_of(&package.name, all_books).into_iter().map(str::to_string));
        }
        desired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::tests::{fixture_manifest, package};

    fn tree() -> PackageTree {
        PackageTree::from_manifest(fixture_manifest()).unwrap()
    }

    fn books() -> BTreeSet<String> {
        ["Genesis", "Exodus", "Rashi on Genesis", "Rashi on Exodus", "Berakhot", "Siddur"]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_descendants_depth_first() {
        let tree = tree();
        assert_eq!(tree.descendants(ROOT_PACKAGE), vec!["Torah with Rashi", "Gen with Rashi", "Talmud"]);
        assert_eq!(tree.descendants("Gen with Rashi"), Vec::<&str>::new());
        assert_eq!(tree.depth("Gen with Rashi"), 2);
        assert_eq!(tree.depth(ROOT_PACKAGE), 0);
    }

    #[test]
    fn test_root_owns_every_book() {
        let mut tree = tree();
        tree.select(ROOT_PACKAGE).unwrap();
        assert_eq!(tree.desired_titles(&books()), books());
        assert!(tree.get("Talmud").unwrap().superseded_by_parent);
    }

    #[test]
    fn test_child_titles_subset_of_selected_ancestor() {
        let mut tree = tree();
        tree.select("Torah with Rashi").unwrap();
        let desired = tree.desired_titles(&books());
        let books = books();
        for title in tree.titles_of("Gen with Rashi", &books) {
            assert!(desired.contains(title), "{title} should be desired");
        }
        assert!(!desired.contains("Berakhot"));
    }

    #[test]
    fn test_select_parent_clears_child_selection() {
        let mut tree = tree();
        tree.select("Gen with Rashi").unwrap();
        tree.select("Torah with Rashi").unwrap();
        let r#gen = tree.get("Gen with Rashi").unwrap();
        assert!(!r#gen.selected);
        assert!(r#gen.superseded_by_parent);
        assert_eq!(tree.selections().into_keys().collect::<Vec<_>>(), vec!["Torah with Rashi"]);
    }

    #[test]
    fn test_deselect_cascades() {
        let mut tree = tree();
        tree.select("Talmud").unwrap();
        tree.select(ROOT_PACKAGE).unwrap();
        tree.deselect(ROOT_PACKAGE).unwrap();
        assert!(!tree.any_selected());
        assert!(tree.iter().all(|package| !package.superseded_by_parent));
    }

    #[test]
    fn test_deselect_superseded_fails() {
        let mut tree = tree();
        tree.select("Torah with Rashi").unwrap();
        let err = tree.deselect("Gen with Rashi").unwrap_err();
        assert_eq!(&*err, &ErrorKind::Superseded("Gen with Rashi".into()));
        assert!(tree.get("Torah with Rashi").unwrap().selected);
    }

    #[test]
    fn test_select_unknown() {
        let err = tree().select("Zohar").unwrap_err();
        assert_eq!(&*err, &ErrorKind::UnknownPackage("Zohar".into()));
    }

    #[test]
    fn test_root_parent_is_ignored() {
        let manifest = vec![package(ROOT_PACKAGE, Some("Elsewhere"), &[]), package("Tanakh", None, &["Genesis"])];
        let tree = PackageTree::from_manifest(manifest).unwrap();
        assert_eq!(tree.root().parent, None);
        assert_eq!(tree.all_titles().into_iter().collect::<Vec<_>>(), vec!["Genesis"]);
        assert_eq!(tree.len(), 2);
    }
}
