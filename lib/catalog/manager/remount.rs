use std::sync::atomic::Ordering;

use tracing::{debug, error, info, instrument, warn};

use super::{CatalogManager, TreeState};
use crate::catalog::LoadReturn;
use crate::catalog::context::{CatalogContext, RootCatalogLocation};
use crate::catalog::hash::ContentHash;
use crate::catalog::loader::{Catalog, CatalogLoader};
use crate::catalog::path::CatalogPath;

impl<L: CatalogLoader> CatalogManager<L> {
    /// Report what [`remount`](Self::remount) would find, without touching the tree.
    pub async fn remount_dryrun(&self) -> LoadReturn {
        let mut ctx = CatalogContext::for_root(RootCatalogLocation::Server);
        let result = self.loader.get_new_root_catalog_context(&mut ctx).await;
        debug!(%result, hash = ?ctx.hash, revision = ?ctx.root_ctlg_revision, "remount dry run");
        result
    }

    /// Swap in the current root catalog if it differs from the mounted one.
    ///
    /// On [`LoadReturn::NoSpace`] or [`LoadReturn::Fail`] the mounted tree, its revision and
    /// every issued inode stay exactly as they were.
    #[instrument(skip(self))]
    pub async fn remount(&self) -> LoadReturn {
        let mut ctx = CatalogContext::for_root(RootCatalogLocation::Server);
        match self.loader.get_new_root_catalog_context(&mut ctx).await {
            LoadReturn::New => {}
            LoadReturn::UpToDate => return LoadReturn::UpToDate,
            other => {
                warn!(result = %other, "failed to resolve the current root catalog");
                return LoadReturn::Fail;
            }
        }

        let mut state = self.state.write().await;
        self.replace_root(&mut state, ctx).await
    }

    /// Swap in the root catalog `hash`, whatever the loader considers current.
    #[instrument(skip(self))]
    pub async fn change_root(&self, hash: &ContentHash) -> LoadReturn {
        let mut ctx = CatalogContext::for_root(RootCatalogLocation::Mounted);
        ctx.hash = Some(*hash);

        let mut state = self.state.write().await;
        self.replace_root(&mut state, ctx).await
    }

    /// Load and open the new root first; only then tear down the old tree.
    async fn replace_root(
        &self,
        state: &mut TreeState<L::Catalog>,
        mut ctx: CatalogContext,
    ) -> LoadReturn {
        let root = CatalogPath::root();
        let Some(hash) = ctx.hash else {
            warn!("loader described a root catalog without a hash");
            return LoadReturn::Fail;
        };
        if state.tree.root().is_some_and(|r| r.hash() == &hash) {
            debug!(%hash, "root catalog already mounted");
            return LoadReturn::UpToDate;
        }

        ctx.mountpoint = root.clone();
        let loaded = self.loader.load_catalog_by_hash(&mut ctx).await;
        if !loaded.is_loaded() {
            warn!(%hash, result = %loaded, "keeping the mounted root catalog");
            return loaded;
        }

        let mut catalog = self.loader.create_catalog(&root, &hash, None);
        if let Err(err) = catalog.open_database(&ctx.sqlite_path) {
            warn!(%hash, %err, "keeping the mounted root catalog");
            return LoadReturn::Fail;
        }
        if let Err(err) = self.check_backing_memory(&root, &catalog) {
            return err.load_return();
        }

        let old_gauge = state.inodes.gauge();
        let old_tree = state.tree.detach_all();
        self.release_nodes(state, old_tree);
        state.inodes.reset();
        self.staging.clear();

        if let Err(err) = self.attach_locked(state, &root, hash, catalog) {
            error!(%hash, %err, "failed to attach the new root catalog");
            return err.load_return();
        }
        if let Some(annotation) = self.annotation.get() {
            annotation.inc_generation(old_gauge);
        }
        self.incarnation.fetch_add(1, Ordering::AcqRel);
        self.check_inode_watermark(state);

        info!(%hash, revision = state.revision, "mounted new root catalog");
        LoadReturn::New
    }
}
