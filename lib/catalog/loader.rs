//! Seams to the backing catalog store and to whatever fetches catalogs.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use super::LoadReturn;
use super::context::CatalogContext;
use super::entry::{CatalogCounters, DirectoryEntry, FileChunk, NestedCatalogRef, XattrList};
use super::error::CatalogError;
use super::hash::{ContentHash, HashAlgorithm};
use super::path::CatalogPath;
use super::tree::CatalogNode;

/// A materialized catalog.
///
/// Implementations answer queries from local data only; they never fetch anything. Entries are
/// returned with their row id in [`DirectoryEntry::inode`].
pub trait Catalog: Send + Sync + 'static {
    /// Open the local backing data produced by [`CatalogLoader::load_catalog_by_hash`].
    fn open_database(&mut self, db_path: &Path) -> Result<(), CatalogError>;

    /// Highest row id in use. The catalog is given this many inodes.
    fn max_row_id(&self) -> u64;

    fn revision(&self) -> u64;

    /// Seconds since the epoch.
    fn last_modified(&self) -> u64;

    /// TTL stored in the catalog itself, if any.
    fn ttl(&self) -> Option<Duration>;

    fn voms_authz(&self) -> Option<String>;

    /// Whether the repository is marked as frequently changing.
    fn is_volatile(&self) -> bool;

    fn lookup_path(&self, path: &CatalogPath) -> Option<DirectoryEntry>;

    fn lookup_row(&self, row_id: u64) -> Option<DirectoryEntry>;

    /// Direct children of `path`, or `None` if `path` is not a directory of this catalog.
    fn listing(&self, path: &CatalogPath) -> Option<Vec<DirectoryEntry>>;

    fn lookup_xattrs(&self, path: &CatalogPath) -> Option<XattrList>;

    fn list_file_chunks(
        &self,
        path: &CatalogPath,
        algorithm: HashAlgorithm,
    ) -> Option<Vec<FileChunk>>;

    /// Nested catalogs mounted directly below this one.
    fn list_nested_catalogs(&self) -> Vec<NestedCatalogRef>;

    fn find_nested(&self, mountpoint: &CatalogPath) -> Option<NestedCatalogRef> {
        self.list_nested_catalogs()
            .into_iter()
            .find(|n| &n.mountpoint == mountpoint)
    }

    fn counters(&self) -> CatalogCounters;

    /// Bytes of memory held by the open backing data.
    fn memory_usage(&self) -> u64;
}

/// Resolves and materializes catalogs on behalf of the manager.
pub trait CatalogLoader: Send + Sync + 'static {
    type Catalog: Catalog;

    /// Describe the current root: fill in its hash, revision and location.
    ///
    /// Returns [`LoadReturn::UpToDate`] when the described root is the one already mounted.
    fn get_new_root_catalog_context(
        &self,
        ctx: &mut CatalogContext,
    ) -> impl Future<Output = LoadReturn> + Send;

    /// Materialize the catalog named by `ctx.hash` and record its local path in
    /// `ctx.sqlite_path`.
    fn load_catalog_by_hash(
        &self,
        ctx: &mut CatalogContext,
    ) -> impl Future<Output = LoadReturn> + Send;

    /// Build an unopened catalog object. No I/O.
    fn create_catalog(
        &self,
        mountpoint: &CatalogPath,
        hash: &ContentHash,
        parent: Option<&Self::Catalog>,
    ) -> Self::Catalog;

    /// Called after a catalog has been attached.
    fn activate_catalog(&self, _node: &CatalogNode<Self::Catalog>) {}

    /// Called after a catalog has been detached.
    fn unload_catalog(&self, _node: &CatalogNode<Self::Catalog>) {}

    /// Prefetch a nested catalog ahead of its mount. Runs with no manager lock held.
    fn stage_nested_catalog_by_hash(
        &self,
        ctx: &mut CatalogContext,
    ) -> impl Future<Output = LoadReturn> + Send {
        self.load_catalog_by_hash(ctx)
    }
}
