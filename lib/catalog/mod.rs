//! Lazily mounted catalog tree.
//!
//! A repository is described by a root catalog and any number of nested catalogs, each covering
//! one subtree. [`CatalogManager`] keeps the currently needed catalogs attached in a
//! [`CatalogTree`], mounts nested catalogs when a lookup crosses into them, and swaps the whole
//! tree when a new root revision is published.

pub mod annotation;
pub mod context;
pub mod entry;
pub mod error;
pub mod hash;
pub mod inode;
pub mod loader;
pub mod lock;
pub mod manager;
pub mod path;
pub mod staging;
pub mod tree;

use std::fmt;

use bitflags::bitflags;

pub use annotation::{InodeAnnotation, InodeGenerationAnnotation, InodeNfsGenerationAnnotation};
pub use context::{CatalogContext, Manifest, RootCatalogLocation};
pub use entry::{
    CatalogCounters, DirectoryEntry, EntryFlags, EntryPerms, EntryStat, EntryType, FileChunk,
    NestedCatalogRef, OwnerMap, StatEntry, SubtreeCounters, XattrList,
};
pub use error::{CatalogError, ManagerError, MountError};
pub use hash::{ContentHash, HashAlgorithm};
pub use inode::{INODE_OFFSET, InodeAllocator, InodeRange, ROOT_INODE};
pub use loader::{Catalog, CatalogLoader};
pub use manager::CatalogManager;
pub use path::CatalogPath;
pub use tree::{CatalogNode, CatalogTree, TreeError};

/// Outcome of loading a catalog or checking for a new root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadReturn {
    New,
    UpToDate,
    NoSpace,
    Fail,
}

impl LoadReturn {
    /// Whether the catalog is available locally after the load.
    #[must_use]
    pub fn is_loaded(self) -> bool {
        matches!(self, Self::New | Self::UpToDate)
    }
}

impl fmt::Display for LoadReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "loaded new catalog",
            Self::UpToDate => "catalog up to date",
            Self::NoSpace => "not enough space to load catalog",
            Self::Fail => "failed to load catalog",
        })
    }
}

bitflags! {
    /// Options for [`CatalogManager::lookup_path`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LookupOptions: u8 {
        /// Plain single-entry lookup.
        const DEFAULT     = 0b01;
        /// Return symlink targets without expanding `$(VAR)` references.
        const RAW_SYMLINK = 0b10;
    }
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}
