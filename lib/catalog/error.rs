use std::path::PathBuf;

use thiserror::Error;

use super::LoadReturn;
use super::path::CatalogPath;
use super::tree::TreeError;

/// Failure reported by a backing [`Catalog`](super::Catalog).
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to open catalog database {path:?}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("catalog database is corrupt: {0}")]
    Corrupt(String),
}

/// Why a catalog could not be mounted.
#[derive(Debug, Error)]
pub enum MountError {
    #[error("not enough space to load catalog at {0}")]
    NoSpace(CatalogPath),

    #[error("failed to load catalog at {mountpoint}: {reason}")]
    LoadFailed {
        mountpoint: CatalogPath,
        reason: LoadReturn,
    },

    #[error("no hash known for catalog at {0}")]
    MissingHash(CatalogPath),

    #[error(transparent)]
    Open(#[from] CatalogError),

    #[error("failed to attach catalog: {0}")]
    Attach(#[from] TreeError),
}

impl MountError {
    /// The load outcome a caller of remount-style operations sees for this error.
    #[must_use]
    pub fn load_return(&self) -> LoadReturn {
        match self {
            Self::NoSpace(_) => LoadReturn::NoSpace,
            Self::LoadFailed { reason, .. } => *reason,
            Self::MissingHash(_) | Self::Open(_) | Self::Attach(_) => LoadReturn::Fail,
        }
    }
}

impl From<MountError> for LoadReturn {
    fn from(err: MountError) -> Self {
        err.load_return()
    }
}

/// Misuse of the manager's one-time setters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManagerError {
    #[error("an inode annotation is already installed")]
    AnnotationAlreadySet,
}
