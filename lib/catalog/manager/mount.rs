use std::sync::Arc;

use tracing::{debug, error, instrument, trace, warn};

use super::{CatalogManager, TreeState};
use crate::catalog::LoadReturn;
use crate::catalog::context::{CatalogContext, RootCatalogLocation};
use crate::catalog::error::MountError;
use crate::catalog::hash::ContentHash;
use crate::catalog::loader::{Catalog, CatalogLoader};
use crate::catalog::path::CatalogPath;
use crate::catalog::staging::StageKey;
use crate::catalog::tree::{CatalogNode, TreeError};

fn check_load(mountpoint: &CatalogPath, loaded: LoadReturn) -> Result<(), MountError> {
    match loaded {
        LoadReturn::New | LoadReturn::UpToDate => Ok(()),
        LoadReturn::NoSpace => Err(MountError::NoSpace(mountpoint.clone())),
        LoadReturn::Fail => Err(MountError::LoadFailed {
            mountpoint: mountpoint.clone(),
            reason: loaded,
        }),
    }
}

impl<L: CatalogLoader> CatalogManager<L> {
    /// Mount the catalog `hash` at `mountpoint` below the catalog currently covering it.
    ///
    /// Idempotent: if a catalog is already attached at `mountpoint`, nothing happens.
    #[instrument(skip(self))]
    pub async fn mount_catalog(
        &self,
        mountpoint: &CatalogPath,
        hash: &ContentHash,
    ) -> Result<(), MountError> {
        let mut state = self.state.write().await;
        self.mount_locked(&mut state, mountpoint, Some(*hash)).await
    }

    /// Load and open a catalog without attaching it to the tree.
    pub async fn load_free_catalog(
        &self,
        mountpoint: &CatalogPath,
        hash: &ContentHash,
    ) -> Result<L::Catalog, MountError> {
        let mut ctx = CatalogContext::for_hash(mountpoint.clone(), *hash);
        check_load(mountpoint, self.loader.load_catalog_by_hash(&mut ctx).await)?;

        let mut catalog = self.loader.create_catalog(mountpoint, hash, None);
        catalog.open_database(&ctx.sqlite_path)?;
        trace!(%mountpoint, %hash, "loaded free catalog");
        Ok(catalog)
    }

    /// Mount under an already held write lock. With `hash == None` the root is resolved
    /// through the loader.
    pub(super) async fn mount_locked(
        &self,
        state: &mut TreeState<L::Catalog>,
        mountpoint: &CatalogPath,
        hash: Option<ContentHash>,
    ) -> Result<(), MountError> {
        if state.tree.is_attached(mountpoint) {
            trace!(%mountpoint, "catalog already attached");
            return Ok(());
        }
        if !mountpoint.is_root() && state.tree.root().is_none() {
            return Err(TreeError::OutsideRoot(mountpoint.clone()).into());
        }

        let ctx = self.load_context(mountpoint, hash).await?;
        let hash = ctx
            .hash
            .ok_or_else(|| MountError::MissingHash(mountpoint.clone()))?;

        let parent = state
            .tree
            .find_catalog(mountpoint)
            .map(|node| Arc::clone(node.catalog()));
        let mut catalog = self
            .loader
            .create_catalog(mountpoint, &hash, parent.as_deref());
        catalog.open_database(&ctx.sqlite_path)?;
        self.check_backing_memory(mountpoint, &catalog)?;

        self.attach_locked(state, mountpoint, hash, catalog)?;
        if !mountpoint.is_root() {
            self.enforce_catalog_watermark(state, mountpoint);
        }
        Ok(())
    }

    /// Produce a loaded context for `mountpoint`, preferring a staged one.
    async fn load_context(
        &self,
        mountpoint: &CatalogPath,
        hash: Option<ContentHash>,
    ) -> Result<CatalogContext, MountError> {
        let mut ctx = match hash {
            Some(hash) => {
                let key = StageKey::new(hash, mountpoint.clone());
                if let Some(staged) = self.staging.take(&key).await {
                    debug!(%mountpoint, %hash, "using staged catalog");
                    return Ok(staged);
                }
                let mut ctx = CatalogContext::for_hash(mountpoint.clone(), hash);
                if mountpoint.is_root() {
                    ctx.root_ctlg_location = RootCatalogLocation::Mounted;
                }
                ctx
            }
            None if mountpoint.is_root() => {
                let mut ctx = CatalogContext::for_root(RootCatalogLocation::Server);
                check_load(
                    mountpoint,
                    self.loader.get_new_root_catalog_context(&mut ctx).await,
                )?;
                ctx.mountpoint = mountpoint.clone();
                ctx
            }
            None => return Err(MountError::MissingHash(mountpoint.clone())),
        };

        check_load(mountpoint, self.loader.load_catalog_by_hash(&mut ctx).await)?;
        Ok(ctx)
    }

    pub(super) fn check_backing_memory(
        &self,
        mountpoint: &CatalogPath,
        catalog: &L::Catalog,
    ) -> Result<(), MountError> {
        let usage = catalog.memory_usage();
        if self.backing_mem_limit > 0 && usage > self.backing_mem_limit {
            warn!(
                %mountpoint,
                usage,
                limit = self.backing_mem_limit,
                "catalog exceeds the backing memory limit"
            );
            return Err(MountError::NoSpace(mountpoint.clone()));
        }
        Ok(())
    }

    /// Assign inodes, attach, and fire the activation hook.
    pub(super) fn attach_locked(
        &self,
        state: &mut TreeState<L::Catalog>,
        mountpoint: &CatalogPath,
        hash: ContentHash,
        catalog: L::Catalog,
    ) -> Result<(), MountError> {
        let range = state.inodes.acquire(catalog.max_row_id());
        let node = CatalogNode::new(
            mountpoint.clone(),
            hash,
            catalog.revision(),
            range,
            Arc::new(catalog),
        );

        if let Err(err) = state.tree.attach(node) {
            state.inodes.release(range);
            error!(%mountpoint, %err, "refusing to break the catalog tree");
            return Err(err.into());
        }
        if let Some(node) = state.tree.get(mountpoint) {
            self.loader.activate_catalog(node);
        }
        if mountpoint.is_root() {
            self.refresh_root_caches(state);
        }
        self.check_inode_watermark(state);

        debug!(%mountpoint, %hash, offset = range.offset, size = range.size, "attached catalog");
        Ok(())
    }

    /// Detach everything off the path to `mountpoint` once too many nested catalogs are
    /// attached.
    fn enforce_catalog_watermark(&self, state: &mut TreeState<L::Catalog>, mountpoint: &CatalogPath) {
        if state.watermark == 0 || state.tree.nested_count() <= state.watermark {
            return;
        }

        let evicted = state.tree.detach_siblings(mountpoint);
        self.stats.n_detach_siblings.inc();
        debug!(
            %mountpoint,
            watermark = state.watermark,
            evicted = evicted.len(),
            "catalog watermark reached, detached siblings"
        );
        self.release_nodes(state, evicted);
    }
}
