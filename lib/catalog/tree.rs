//! Arena of attached catalogs.
//!
//! Nodes are keyed by mountpoint and linked by key, never by reference: a node names its parent
//! and children by [`CatalogPath`]. The arena remembers attach order, which is the eviction
//! order used by [`CatalogTree::detach_siblings`].

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;

use hashlink::LinkedHashMap;
use thiserror::Error;

use super::hash::ContentHash;
use super::inode::InodeRange;
use super::path::CatalogPath;

/// One attached catalog.
#[derive(Debug)]
pub struct CatalogNode<C> {
    mountpoint: CatalogPath,
    hash: ContentHash,
    revision: u64,
    inode_range: InodeRange,
    parent: Option<CatalogPath>,
    children: BTreeSet<CatalogPath>,
    catalog: Arc<C>,
}

impl<C> CatalogNode<C> {
    /// A detached node. Parent and children are filled in by [`CatalogTree::attach`].
    pub fn new(
        mountpoint: CatalogPath,
        hash: ContentHash,
        revision: u64,
        inode_range: InodeRange,
        catalog: Arc<C>,
    ) -> Self {
        Self {
            mountpoint,
            hash,
            revision,
            inode_range,
            parent: None,
            children: BTreeSet::new(),
            catalog,
        }
    }

    #[must_use]
    pub fn mountpoint(&self) -> &CatalogPath {
        &self.mountpoint
    }

    #[must_use]
    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn inode_range(&self) -> InodeRange {
        self.inode_range
    }

    #[must_use]
    pub fn parent(&self) -> Option<&CatalogPath> {
        self.parent.as_ref()
    }

    pub fn children(&self) -> impl Iterator<Item = &CatalogPath> {
        self.children.iter()
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<C> {
        &self.catalog
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.mountpoint.is_root()
    }
}

/// Structural violations of the tree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("a catalog is already attached at {0}")]
    DuplicateMountpoint(CatalogPath),

    #[error("catalog at {0} still has attached children")]
    HasChildren(CatalogPath),

    #[error("no catalog is attached at {0}")]
    NotAttached(CatalogPath),

    #[error("{0} cannot be attached before a root catalog")]
    OutsideRoot(CatalogPath),
}

/// The attached catalogs, always forming a single tree under the root.
#[derive(Debug)]
pub struct CatalogTree<C> {
    nodes: LinkedHashMap<CatalogPath, CatalogNode<C>>,
}

impl<C> Default for CatalogTree<C> {
    fn default() -> Self {
        Self {
            nodes: LinkedHashMap::new(),
        }
    }
}

impl<C> CatalogTree<C> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `node` below the deepest attached catalog covering its mountpoint.
    ///
    /// Attached catalogs that lie below the new mountpoint are moved under the new node.
    pub fn attach(&mut self, mut node: CatalogNode<C>) -> Result<(), TreeError> {
        let key = node.mountpoint.clone();
        if self.nodes.contains_key(&key) {
            return Err(TreeError::DuplicateMountpoint(key));
        }

        if key.is_root() {
            node.parent = None;
            node.children.clear();
            self.nodes.insert(key, node);
            return Ok(());
        }

        let parent_key = self
            .find_catalog(&key)
            .map(|p| p.mountpoint.clone())
            .ok_or_else(|| TreeError::OutsideRoot(key.clone()))?;

        let adopted: Vec<CatalogPath> = self
            .nodes
            .get(&parent_key)
            .map(|p| {
                p.children
                    .iter()
                    .filter(|c| key.is_strict_prefix_of(c))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(parent) = self.nodes.get_mut(&parent_key) {
            for child in &adopted {
                parent.children.remove(child);
            }
            parent.children.insert(key.clone());
        }
        for child in &adopted {
            if let Some(c) = self.nodes.get_mut(child) {
                c.parent = Some(key.clone());
            }
        }

        node.parent = Some(parent_key);
        node.children = adopted.into_iter().collect();
        self.nodes.insert(key, node);
        Ok(())
    }

    /// Detach a single node that has no attached children.
    pub fn detach(&mut self, mountpoint: &CatalogPath) -> Result<CatalogNode<C>, TreeError> {
        let node = self
            .nodes
            .get(mountpoint)
            .ok_or_else(|| TreeError::NotAttached(mountpoint.clone()))?;
        if !node.children.is_empty() {
            return Err(TreeError::HasChildren(mountpoint.clone()));
        }

        let node = self
            .nodes
            .remove(mountpoint)
            .ok_or_else(|| TreeError::NotAttached(mountpoint.clone()))?;
        if let Some(parent_key) = &node.parent
            && let Some(parent) = self.nodes.get_mut(parent_key)
        {
            parent.children.remove(mountpoint);
        }
        Ok(node)
    }

    /// Detach `mountpoint` and everything below it, children first.
    pub fn detach_subtree(
        &mut self,
        mountpoint: &CatalogPath,
    ) -> Result<Vec<CatalogNode<C>>, TreeError> {
        if !self.nodes.contains_key(mountpoint) {
            return Err(TreeError::NotAttached(mountpoint.clone()));
        }

        let mut order = Vec::new();
        let mut stack = vec![(mountpoint.clone(), false)];
        while let Some((key, expanded)) = stack.pop() {
            if expanded {
                order.push(key);
                continue;
            }
            stack.push((key.clone(), true));
            if let Some(node) = self.nodes.get(&key) {
                stack.extend(node.children.iter().rev().map(|c| (c.clone(), false)));
            }
        }

        order.iter().map(|key| self.detach(key)).collect()
    }

    /// Detach every catalog that is neither `path`'s covering catalog nor one of its ancestors,
    /// oldest attach first.
    pub fn detach_siblings(&mut self, path: &CatalogPath) -> Vec<CatalogNode<C>> {
        let victims: Vec<CatalogPath> = self
            .nodes
            .keys()
            .filter(|mountpoint| !mountpoint.is_prefix_of(path))
            .cloned()
            .collect();

        let mut detached = Vec::new();
        for victim in victims {
            if let Ok(nodes) = self.detach_subtree(&victim) {
                detached.extend(nodes);
            }
        }
        detached
    }

    /// Detach the whole tree.
    pub fn detach_all(&mut self) -> Vec<CatalogNode<C>> {
        self.detach_subtree(&CatalogPath::root())
            .unwrap_or_default()
    }

    /// Deepest attached catalog whose mountpoint is a prefix of `path`.
    #[must_use]
    pub fn find_catalog(&self, path: &CatalogPath) -> Option<&CatalogNode<C>> {
        path.ancestors()
            .into_iter()
            .find_map(|ancestor| self.nodes.get(&ancestor))
    }

    #[must_use]
    pub fn get(&self, mountpoint: &CatalogPath) -> Option<&CatalogNode<C>> {
        self.nodes.get(mountpoint)
    }

    #[must_use]
    pub fn is_attached(&self, mountpoint: &CatalogPath) -> bool {
        self.nodes.contains_key(mountpoint)
    }

    #[must_use]
    pub fn root(&self) -> Option<&CatalogNode<C>> {
        self.nodes.get(&CatalogPath::root())
    }

    /// The catalog owning raw inode `inode`.
    #[must_use]
    pub fn find_by_inode(&self, inode: u64) -> Option<&CatalogNode<C>> {
        self.nodes.values().find(|n| n.inode_range.contains(inode))
    }

    /// All attached nodes in attach order.
    pub fn iter(&self) -> impl Iterator<Item = &CatalogNode<C>> {
        self.nodes.values()
    }

    pub fn mountpoints(&self) -> impl Iterator<Item = &CatalogPath> {
        self.nodes.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of attached catalogs other than the root.
    #[must_use]
    pub fn nested_count(&self) -> usize {
        self.nodes.len() - usize::from(self.root().is_some())
    }

    /// One `-> mountpoint` line per catalog, indented by depth, depth-first.
    #[must_use]
    pub fn print_hierarchy(&self) -> String {
        let mut out = String::new();
        let Some(root) = self.root() else {
            return out;
        };

        let mut stack = vec![(root, 0_usize)];
        while let Some((node, depth)) = stack.pop() {
            let _ = writeln!(out, "{}-> {}", "  ".repeat(depth), node.mountpoint);
            stack.extend(
                node.children
                    .iter()
                    .rev()
                    .filter_map(|c| self.nodes.get(c))
                    .map(|c| (c, depth + 1)),
            );
        }
        out
    }
}
