//! Inputs and outputs of a single catalog load.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::hash::ContentHash;
use super::path::CatalogPath;

/// Where a root catalog should be fetched from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RootCatalogLocation {
    /// Nested catalogs need no location.
    #[default]
    NoLocationNeeded,
    /// A copy that is already mounted or cached locally.
    Mounted,
    /// The origin server.
    Server,
    /// A locally cached breadcrumb naming the last known root.
    Breadcrumb,
}

/// Signed description of the current repository root, as fetched by a loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub root_hash: ContentHash,
    pub revision: u64,
    /// Seconds since the epoch.
    pub publish_timestamp: u64,
    pub ttl: Option<Duration>,
}

/// State carried through the two load phases.
///
/// [`CatalogLoader::get_new_root_catalog_context`](super::CatalogLoader::get_new_root_catalog_context)
/// fills in the hash, revision and location of the current root. Then
/// [`CatalogLoader::load_catalog_by_hash`](super::CatalogLoader::load_catalog_by_hash)
/// materializes the catalog and records `sqlite_path`.
#[derive(Debug, Clone, Default)]
pub struct CatalogContext {
    pub hash: Option<ContentHash>,
    pub mountpoint: CatalogPath,
    pub sqlite_path: PathBuf,
    pub root_ctlg_revision: Option<u64>,
    pub root_ctlg_location: RootCatalogLocation,
    pub manifest: Option<Arc<Manifest>>,
}

impl CatalogContext {
    /// Context for a root catalog whose hash is not known yet.
    #[must_use]
    pub fn for_root(location: RootCatalogLocation) -> Self {
        Self {
            root_ctlg_location: location,
            ..Self::default()
        }
    }

    /// Context for a catalog whose hash is already known.
    #[must_use]
    pub fn for_hash(mountpoint: CatalogPath, hash: ContentHash) -> Self {
        Self {
            hash: Some(hash),
            mountpoint,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_root_catalog(&self) -> bool {
        self.mountpoint.is_root()
    }
}
