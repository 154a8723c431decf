//! The catalog manager.
//!
//! All tree state lives behind one [`TreeLock`]. Readers resolve paths against attached catalogs;
//! anything that attaches or detaches a catalog drops its read guard, takes the write lock and
//! re-validates what it saw.

mod mount;
mod remount;
mod resolve;

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytesize::ByteSize;
use tracing::{debug, trace, warn};

use super::annotation::{InodeAnnotation, InodeGenerationAnnotation, InodeNfsGenerationAnnotation};
use super::entry::OwnerMap;
use super::error::{ManagerError, MountError};
use super::hash::ContentHash;
use super::inode::{INODE_OFFSET, InodeAllocator, ROOT_INODE};
use super::loader::{Catalog, CatalogLoader};
use super::lock::TreeLock;
use super::path::CatalogPath;
use super::staging::StagingCache;
use super::tree::{CatalogNode, CatalogTree};
use crate::config::{InodeAnnotationKind, ManagerConfig};
use crate::stats::{Statistics, StatisticsRegistry};

/// Everything guarded by the tree lock.
struct TreeState<C> {
    tree: CatalogTree<C>,
    inodes: InodeAllocator,
    revision: u64,
    timestamp: u64,
    ttl: Option<Duration>,
    voms_authz: Option<String>,
    watermark: usize,
    uid_map: OwnerMap,
    gid_map: OwnerMap,
}

impl<C> TreeState<C> {
    fn new(watermark: usize) -> Self {
        Self {
            tree: CatalogTree::new(),
            inodes: InodeAllocator::new(),
            revision: 0,
            timestamp: 0,
            ttl: None,
            voms_authz: None,
            watermark,
            uid_map: OwnerMap::new(),
            gid_map: OwnerMap::new(),
        }
    }
}

/// Owns the attached catalog tree of one repository.
pub struct CatalogManager<L: CatalogLoader> {
    loader: Arc<L>,
    state: TreeLock<TreeState<L::Catalog>>,
    stats: Statistics,
    staging: StagingCache,
    annotation: OnceLock<Box<dyn InodeAnnotation>>,
    volatile: AtomicBool,
    incarnation: AtomicU64,
    backing_mem_limit: u64,
    default_ttl: Duration,
}

impl<L: CatalogLoader> CatalogManager<L> {
    /// A manager with default settings and no inode annotation.
    pub fn new(loader: Arc<L>, registry: &StatisticsRegistry) -> Self {
        let config = ManagerConfig {
            inode_annotation: InodeAnnotationKind::None,
            ..ManagerConfig::default()
        };
        Self::with_config(loader, registry, &config)
    }

    pub fn with_config(loader: Arc<L>, registry: &StatisticsRegistry, config: &ManagerConfig) -> Self {
        let stats = Statistics::new(registry);
        let state = TreeLock::new(
            TreeState::new(config.catalog_watermark),
            Arc::clone(&stats.n_write_lock),
            Arc::clone(&stats.ns_write_lock),
        );

        let annotation: OnceLock<Box<dyn InodeAnnotation>> = OnceLock::new();
        match config.inode_annotation {
            InodeAnnotationKind::None => {}
            InodeAnnotationKind::Generation => {
                let _ = annotation.set(Box::new(InodeGenerationAnnotation::new()));
            }
            InodeAnnotationKind::NfsGeneration => {
                let _ = annotation.set(Box::new(InodeNfsGenerationAnnotation::new()));
            }
        }

        Self {
            loader,
            state,
            stats,
            staging: StagingCache::new(),
            annotation,
            volatile: AtomicBool::new(false),
            incarnation: AtomicU64::new(0),
            backing_mem_limit: config.backing_mem_limit_bytes(),
            default_ttl: config.default_ttl(),
        }
    }

    /// Mount the current root catalog. A no-op if a root is already attached.
    pub async fn init(&self) -> Result<(), MountError> {
        let mut state = self.state.write().await;
        self.mount_locked(&mut state, &CatalogPath::root(), None).await
    }

    pub fn loader(&self) -> &Arc<L> {
        &self.loader
    }

    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    /// Install the inode annotation. Only the first call succeeds.
    pub fn set_inode_annotation(
        &self,
        annotation: Box<dyn InodeAnnotation>,
    ) -> Result<(), ManagerError> {
        self.annotation
            .set(annotation)
            .map_err(|_| ManagerError::AnnotationAlreadySet)
    }

    /// Maximum number of attached nested catalogs; zero disables sibling eviction.
    pub async fn set_catalog_watermark(&self, limit: usize) {
        self.state.write().await.watermark = limit;
    }

    pub async fn set_owner_maps(&self, uid_map: OwnerMap, gid_map: OwnerMap) {
        let mut state = self.state.write().await;
        state.uid_map = uid_map;
        state.gid_map = gid_map;
    }

    /// Detach every nested catalog, leaving only the root.
    pub async fn detach_nested(&self) {
        let mut state = self.state.write().await;
        let children: Vec<CatalogPath> = match state.tree.root() {
            Some(root) => root.children().cloned().collect(),
            None => return,
        };

        let mut detached = Vec::new();
        for child in &children {
            match state.tree.detach_subtree(child) {
                Ok(nodes) => detached.extend(nodes),
                Err(err) => warn!(%child, %err, "failed to detach nested catalog"),
            }
        }
        debug!(count = detached.len(), "detached nested catalogs");
        self.release_nodes(&mut state, detached);
    }

    /// Revision of the mounted root catalog.
    pub async fn revision(&self) -> u64 {
        self.state.read().await.revision
    }

    /// Publish time of the mounted root catalog, in seconds since the epoch.
    pub async fn timestamp(&self) -> u64 {
        self.state.read().await.timestamp
    }

    /// TTL of the mounted root: its explicit TTL, or the configured default.
    pub async fn ttl(&self) -> Duration {
        self.state.read().await.ttl.unwrap_or(self.default_ttl)
    }

    pub async fn has_explicit_ttl(&self) -> bool {
        self.state.read().await.ttl.is_some()
    }

    pub async fn voms_authz(&self) -> Option<String> {
        self.state.read().await.voms_authz.clone()
    }

    /// Number of attached catalogs, root included.
    pub async fn num_catalogs(&self) -> usize {
        self.state.read().await.tree.len()
    }

    /// Attached mountpoints in attach order.
    pub async fn attached_mountpoints(&self) -> Vec<CatalogPath> {
        self.state.read().await.tree.mountpoints().cloned().collect()
    }

    pub async fn root_hash(&self) -> Option<ContentHash> {
        self.state.read().await.tree.root().map(|r| *r.hash())
    }

    pub async fn print_hierarchy(&self) -> String {
        self.state.read().await.tree.print_hierarchy()
    }

    /// Backing memory held by every attached catalog, one line per catalog.
    pub async fn print_all_mem_statistics(&self) -> String {
        let state = self.state.read().await;
        let mut out = String::new();
        let mut total = 0_u64;
        for node in state.tree.iter() {
            let usage = node.catalog().memory_usage();
            total += usage;
            let _ = writeln!(out, "{}: {}", node.mountpoint(), ByteSize::b(usage));
        }
        let _ = writeln!(out, "total: {}", ByteSize::b(total));
        out
    }

    /// Number of prefetched nested catalogs waiting to be mounted.
    pub fn staged_catalogs(&self) -> usize {
        self.staging.len()
    }

    /// Next raw inode the allocator would hand out.
    pub async fn inode_gauge(&self) -> u64 {
        self.state.read().await.inodes.gauge()
    }

    pub async fn inode_watermark_exceeded(&self) -> bool {
        self.state.read().await.inodes.watermark_exceeded()
    }

    /// Number of root swaps since construction.
    pub fn incarnation(&self) -> u64 {
        self.incarnation.load(Ordering::Acquire)
    }

    /// Whether the mounted root is marked volatile.
    pub fn is_volatile(&self) -> bool {
        self.volatile.load(Ordering::Acquire)
    }

    /// Current annotation generation; zero without an annotation.
    pub fn generation(&self) -> u64 {
        self.annotation.get().map_or(0, |a| a.generation())
    }

    /// Whether `inode` was issued in the current generation.
    pub fn valid_inode(&self, inode: u64) -> bool {
        self.annotation.get().is_none_or(|a| a.valid_inode(inode))
    }

    pub fn root_inode(&self) -> u64 {
        self.annotate(ROOT_INODE)
    }

    /// Map reserved inode numbers onto the root inode.
    pub fn mangle_inode(&self, inode: u64) -> u64 {
        if inode <= INODE_OFFSET {
            self.root_inode()
        } else {
            inode
        }
    }

    fn annotate(&self, raw: u64) -> u64 {
        self.annotation.get().map_or(raw, |a| a.annotate(raw))
    }

    fn strip(&self, inode: u64) -> u64 {
        self.annotation.get().map_or(inode, |a| a.strip(inode))
    }

    /// Give back the inodes of detached nodes and fire the unload hook.
    fn release_nodes(&self, state: &mut TreeState<L::Catalog>, nodes: Vec<CatalogNode<L::Catalog>>) {
        for node in nodes {
            state.inodes.release(node.inode_range());
            self.loader.unload_catalog(&node);
            trace!(mountpoint = %node.mountpoint(), hash = %node.hash(), "detached catalog");
        }
    }

    fn refresh_root_caches(&self, state: &mut TreeState<L::Catalog>) {
        let Some(root) = state.tree.root() else {
            return;
        };
        let catalog = Arc::clone(root.catalog());

        state.revision = catalog.revision();
        state.timestamp = catalog.last_modified();
        state.ttl = catalog.ttl();
        state.voms_authz = catalog.voms_authz();
        self.volatile.store(catalog.is_volatile(), Ordering::Release);
        self.stats
            .catalog_revision
            .set(i64::try_from(state.revision).unwrap_or(i64::MAX));
    }

    fn check_inode_watermark(&self, state: &mut TreeState<L::Catalog>) {
        let generation = self.generation();
        if state.inodes.check_watermark(generation) {
            warn!(
                gauge = state.inodes.gauge(),
                generation, "inodes are about to exceed the 32-bit range"
            );
        }
    }
}

impl<L: CatalogLoader> Drop for CatalogManager<L> {
    fn drop(&mut self) {
        let nodes = self.state.get_mut().tree.detach_all();
        for node in &nodes {
            self.loader.unload_catalog(node);
        }
    }
}
