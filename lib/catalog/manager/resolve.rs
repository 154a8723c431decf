//! Path resolution across catalog boundaries.
//!
//! Every query first looks at the attached tree under the read lock. If the path lies in a
//! nested catalog that is not attached yet, the read guard is given up, the catalog is staged
//! with no lock held, and the write lock is taken to mount it. The write path re-checks the tree
//! because another task may have mounted the same catalog in between.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::RwLockReadGuard;
use tracing::{trace, warn};

use super::{CatalogManager, TreeState};
use crate::catalog::LookupOptions;
use crate::catalog::context::CatalogContext;
use crate::catalog::entry::{
    DirectoryEntry, FileChunk, NestedCatalogRef, StatEntry, SubtreeCounters, XattrList,
    expand_symlink_env,
};
use crate::catalog::error::MountError;
use crate::catalog::hash::{ContentHash, HashAlgorithm};
use crate::catalog::loader::{Catalog, CatalogLoader};
use crate::catalog::path::CatalogPath;
use crate::catalog::staging::StageKey;
use crate::catalog::tree::{CatalogNode, TreeError};

type ReadGuard<'a, C> = RwLockReadGuard<'a, TreeState<C>>;

/// Whether nested catalog `nested` of the catalog at `leaf` has to be mounted to serve `path`.
///
/// A stat of the mountpoint itself is answered by the parent's transition point, so the
/// mountpoint only counts when the caller is going to list it.
fn needs_nested(
    leaf: &CatalogPath,
    nested: &CatalogPath,
    path: &CatalogPath,
    can_listing: bool,
) -> bool {
    if !leaf.is_strict_prefix_of(nested) {
        return false;
    }
    if can_listing {
        nested.is_prefix_of(path)
    } else {
        nested.is_strict_prefix_of(path)
    }
}

impl<L: CatalogLoader> CatalogManager<L> {
    /// Look up a single entry.
    ///
    /// Returns `None` when the path does not exist, which is counted as a negative lookup.
    pub async fn lookup_path(
        &self,
        path: &CatalogPath,
        options: LookupOptions,
    ) -> Option<DirectoryEntry> {
        self.stats.n_lookup_path.inc();

        let state = self.state.read().await;
        if let Some(entry) = self.lookup_attached(&state, path, options) {
            return Some(entry);
        }
        let Some((entry_point, nested)) = self.pending_nested(&state, path, false) else {
            drop(state);
            return self.negative_lookup(path);
        };

        let key = self.stage_nested_catalog_and_unlock(state, nested).await;
        let mut state = self.state.write().await;
        let mut found = self.lookup_attached(&state, path, options);
        if found.is_none() {
            match self
                .mount_subtree(&mut state, path, Some(&entry_point), false)
                .await
            {
                Ok(_) => found = self.lookup_attached(&state, path, options),
                Err(err) => warn!(%path, %err, "failed to mount nested catalog for lookup"),
            }
        }
        self.staging.discard(&key);
        drop(state);

        found.or_else(|| self.negative_lookup(path))
    }

    /// Look up an entry by inode number among the attached catalogs.
    pub async fn lookup_inode(&self, inode: u64) -> Option<DirectoryEntry> {
        self.stats.n_lookup_inode.inc();
        // The generation only moves under the write lock.
        let state = self.state.read().await;
        let inode = self.mangle_inode(inode);
        if !self.valid_inode(inode) {
            trace!(inode, "inode is from an earlier generation");
            return None;
        }

        let raw = self.strip(inode);
        let node = state.tree.find_by_inode(raw)?;
        let row = node.inode_range().row_for_inode(raw)?;
        let entry = node.catalog().lookup_row(row)?;
        Some(self.present(&state, node, entry, true))
    }

    /// Direct children of the directory at `path`.
    pub async fn listing(
        &self,
        path: &CatalogPath,
        expand_symlink: bool,
    ) -> Option<Vec<DirectoryEntry>> {
        self.stats.n_listing.inc();
        let (state, leaf) = self.covering_catalog(path, true).await?;
        let node = state.tree.get(&leaf)?;
        let entries = node.catalog().listing(path)?;
        Some(
            entries
                .into_iter()
                .map(|entry| self.present(&state, node, entry, expand_symlink))
                .collect(),
        )
    }

    /// Like [`listing`](Self::listing), returning attributes only.
    pub async fn listing_stat(&self, path: &CatalogPath) -> Option<Vec<StatEntry>> {
        let entries = self.listing(path, false).await?;
        Some(entries.iter().map(StatEntry::from).collect())
    }

    pub async fn lookup_xattrs(&self, path: &CatalogPath) -> Option<XattrList> {
        self.stats.n_lookup_xattrs.inc();
        let (state, leaf) = self.covering_catalog(path, false).await?;
        state.tree.get(&leaf)?.catalog().lookup_xattrs(path)
    }

    pub async fn list_file_chunks(
        &self,
        path: &CatalogPath,
        algorithm: HashAlgorithm,
    ) -> Option<Vec<FileChunk>> {
        let (state, leaf) = self.covering_catalog(path, false).await?;
        state
            .tree
            .get(&leaf)?
            .catalog()
            .list_file_chunks(path, algorithm)
    }

    /// The nested catalog serving `path`, as listed by its parent. `None` for paths served by
    /// the root catalog.
    pub async fn lookup_nested(&self, path: &CatalogPath) -> Option<NestedCatalogRef> {
        let (state, leaf) = self.covering_catalog(path, true).await?;
        let node = state.tree.get(&leaf)?;
        let parent = state.tree.get(node.parent()?)?;
        Some(
            parent
                .catalog()
                .find_nested(node.mountpoint())
                .unwrap_or_else(|| NestedCatalogRef {
                    mountpoint: node.mountpoint().clone(),
                    hash: *node.hash(),
                    size: 0,
                }),
        )
    }

    /// Mountpoints of the catalog serving `path`, its ancestors, and every nested catalog
    /// reachable below it.
    ///
    /// Ancestors come first starting at the root, then the serving catalog, then its nested
    /// catalogs depth-first. Nested catalogs that are not attached are loaded as free catalogs
    /// and never attached.
    pub async fn list_catalog_skein(&self, path: &CatalogPath) -> Option<Vec<CatalogPath>> {
        let (state, leaf) = self.covering_catalog(path, true).await?;
        let node = state.tree.get(&leaf)?;

        let mut skein = Vec::new();
        let mut cursor = node.parent().cloned();
        while let Some(ancestor) = cursor {
            cursor = state.tree.get(&ancestor).and_then(|n| n.parent().cloned());
            skein.push(ancestor);
        }
        skein.reverse();
        skein.push(leaf.clone());

        let mut pending: Vec<NestedCatalogRef> = node.catalog().list_nested_catalogs();
        pending.reverse();
        drop(state);

        let mut seen: BTreeSet<CatalogPath> = skein.iter().cloned().collect();
        while let Some(nested) = pending.pop() {
            if !leaf.is_strict_prefix_of(&nested.mountpoint) || !seen.insert(nested.mountpoint.clone())
            {
                continue;
            }
            skein.push(nested.mountpoint.clone());

            let children = match self.attached_catalog(&nested.mountpoint, &nested.hash).await {
                Some(catalog) => catalog.list_nested_catalogs(),
                None => match self
                    .load_free_catalog(&nested.mountpoint, &nested.hash)
                    .await
                {
                    Ok(catalog) => catalog.list_nested_catalogs(),
                    Err(err) => {
                        warn!(mountpoint = %nested.mountpoint, %err, "skipping unreadable nested catalog");
                        continue;
                    }
                },
            };
            pending.extend(children.into_iter().rev());
        }

        Some(skein)
    }

    /// Hash of the nested catalog mounted at `mountpoint`, as listed by its parent. Never
    /// mounts anything.
    pub async fn get_nested_catalog_hash(&self, mountpoint: &CatalogPath) -> Option<ContentHash> {
        if mountpoint.is_root() {
            return None;
        }
        let state = self.state.read().await;
        let mut node = state.tree.find_catalog(mountpoint)?;
        if node.mountpoint() == mountpoint {
            node = state.tree.get(node.parent()?)?;
        }
        node.catalog().find_nested(mountpoint).map(|n| n.hash)
    }

    /// Counters of the catalog serving `path`.
    pub async fn lookup_counters(&self, path: &CatalogPath) -> Option<SubtreeCounters> {
        let (state, leaf) = self.covering_catalog(path, true).await?;
        let node = state.tree.get(&leaf)?;
        Some(SubtreeCounters {
            mountpoint: leaf.clone(),
            hash: *node.hash(),
            counters: node.catalog().counters(),
        })
    }

    /// Mount every nested catalog between `entry_point` and `path`. Returns the mountpoint of
    /// the catalog that serves `path` afterwards.
    ///
    /// The walk starts at `entry_point` if it is still attached and covers `path`, otherwise at
    /// the deepest attached catalog covering `path`. Catalogs attached on the way are skipped.
    async fn mount_subtree(
        &self,
        state: &mut TreeState<L::Catalog>,
        path: &CatalogPath,
        entry_point: Option<&CatalogPath>,
        can_listing: bool,
    ) -> Result<CatalogPath, MountError> {
        let start = entry_point
            .filter(|e| e.is_prefix_of(path) && state.tree.is_attached(e))
            .cloned()
            .or_else(|| state.tree.find_catalog(path).map(|n| n.mountpoint().clone()));
        let mut leaf = start.ok_or_else(|| TreeError::OutsideRoot(path.clone()))?;

        loop {
            let next = state.tree.get(&leaf).and_then(|node| {
                self.stats.n_nested_listing.inc();
                node.catalog()
                    .list_nested_catalogs()
                    .into_iter()
                    .find(|n| needs_nested(&leaf, &n.mountpoint, path, can_listing))
            });
            let Some(nested) = next else {
                return Ok(leaf);
            };

            self.mount_locked(state, &nested.mountpoint, Some(nested.hash))
                .await?;
            leaf = nested.mountpoint;
        }
    }

    /// Release the read guard, then prefetch `nested` into the staging cache.
    async fn stage_nested_catalog_and_unlock(
        &self,
        guard: ReadGuard<'_, L::Catalog>,
        nested: NestedCatalogRef,
    ) -> StageKey {
        drop(guard);

        let key = StageKey::new(nested.hash, nested.mountpoint.clone());
        let loader = Arc::clone(&self.loader);
        let staged = self
            .staging
            .stage(key.clone(), move || async move {
                let mut ctx = CatalogContext::for_hash(nested.mountpoint, nested.hash);
                let loaded = loader.stage_nested_catalog_by_hash(&mut ctx).await;
                if loaded.is_loaded() {
                    Some(ctx)
                } else {
                    trace!(mountpoint = %ctx.mountpoint, result = %loaded, "staging failed");
                    None
                }
            })
            .await;

        trace!(mountpoint = %key.mountpoint, staged = staged.is_some(), "staged nested catalog");
        key
    }

    /// The read guard plus the mountpoint of the catalog serving `path`, mounting whatever is
    /// missing on the way.
    async fn covering_catalog(
        &self,
        path: &CatalogPath,
        can_listing: bool,
    ) -> Option<(ReadGuard<'_, L::Catalog>, CatalogPath)> {
        let state = self.state.read().await;
        let Some((entry_point, nested)) = self.pending_nested(&state, path, can_listing) else {
            let leaf = state.tree.find_catalog(path)?.mountpoint().clone();
            return Some((state, leaf));
        };

        let key = self.stage_nested_catalog_and_unlock(state, nested).await;
        let mut state = self.state.write().await;
        let mounted = self
            .mount_subtree(&mut state, path, Some(&entry_point), can_listing)
            .await;
        self.staging.discard(&key);

        match mounted {
            Ok(leaf) => Some((state.downgrade(), leaf)),
            Err(err) => {
                warn!(%path, %err, "failed to mount nested catalog");
                None
            }
        }
    }

    /// The first unattached nested catalog between the attached tree and `path`, together with
    /// the mountpoint of the attached catalog listing it.
    fn pending_nested(
        &self,
        state: &TreeState<L::Catalog>,
        path: &CatalogPath,
        can_listing: bool,
    ) -> Option<(CatalogPath, NestedCatalogRef)> {
        let leaf = state.tree.find_catalog(path)?;
        self.stats.n_nested_listing.inc();
        let nested = leaf
            .catalog()
            .list_nested_catalogs()
            .into_iter()
            .find(|n| needs_nested(leaf.mountpoint(), &n.mountpoint, path, can_listing))?;
        Some((leaf.mountpoint().clone(), nested))
    }

    async fn attached_catalog(
        &self,
        mountpoint: &CatalogPath,
        hash: &ContentHash,
    ) -> Option<Arc<L::Catalog>> {
        let state = self.state.read().await;
        state
            .tree
            .get(mountpoint)
            .filter(|n| n.hash() == hash)
            .map(|n| Arc::clone(n.catalog()))
    }

    /// The entry for `path` from the attached tree.
    ///
    /// A nested mountpoint is always answered from the parent's transition point, so the result
    /// is the same whether or not the nested catalog is attached.
    fn lookup_attached(
        &self,
        state: &TreeState<L::Catalog>,
        path: &CatalogPath,
        options: LookupOptions,
    ) -> Option<DirectoryEntry> {
        let mut node = state.tree.find_catalog(path)?;
        if !node.is_root()
            && node.mountpoint() == path
            && let Some(parent) = node.parent().and_then(|p| state.tree.get(p))
        {
            node = parent;
        }
        let entry = node.catalog().lookup_path(path)?;
        let expand = !options.contains(LookupOptions::RAW_SYMLINK);
        Some(self.present(state, node, entry, expand))
    }

    /// Turn a row as stored in `node`'s catalog into the entry callers see.
    fn present(
        &self,
        state: &TreeState<L::Catalog>,
        node: &CatalogNode<L::Catalog>,
        mut entry: DirectoryEntry,
        expand_symlink: bool,
    ) -> DirectoryEntry {
        entry.inode = self.annotate(node.inode_range().inode_for_row(entry.inode));
        entry.uid = state.uid_map.map(entry.uid);
        entry.gid = state.gid_map.map(entry.gid);
        if expand_symlink {
            entry.symlink = entry.symlink.map(|target| expand_symlink_env(&target));
        }
        entry
    }

    fn negative_lookup(&self, path: &CatalogPath) -> Option<DirectoryEntry> {
        self.stats.n_lookup_path_negative.inc();
        trace!(%path, "negative lookup");
        None
    }
}
