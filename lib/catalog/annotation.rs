//! Inode annotation policies.
//!
//! Raw inodes restart at [`ROOT_INODE`] whenever the root catalog is replaced. An annotation
//! shifts every issued inode by a generation offset so that numbers handed out before the swap
//! can be told apart from numbers handed out after it.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use super::inode::ROOT_INODE;

/// Translates raw inodes into numbers that stay unambiguous across root swaps.
pub trait InodeAnnotation: Send + Sync + Debug {
    /// Whether `inode` was issued in the current generation.
    fn valid_inode(&self, inode: u64) -> bool;

    fn annotate(&self, raw: u64) -> u64;

    /// Inverse of [`annotate`](Self::annotate).
    fn strip(&self, inode: u64) -> u64;

    /// Move the generation forward by `by`, invalidating everything issued so far.
    fn inc_generation(&self, by: u64);

    /// Current generation offset.
    fn generation(&self) -> u64;
}

/// Plain offset annotation.
#[derive(Debug, Default)]
pub struct InodeGenerationAnnotation {
    offset: AtomicU64,
}

impl InodeGenerationAnnotation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl InodeAnnotation for InodeGenerationAnnotation {
    fn valid_inode(&self, inode: u64) -> bool {
        inode >= self.offset.load(Ordering::Acquire)
    }

    fn annotate(&self, raw: u64) -> u64 {
        raw + self.offset.load(Ordering::Acquire)
    }

    fn strip(&self, inode: u64) -> u64 {
        inode.saturating_sub(self.offset.load(Ordering::Acquire))
    }

    fn inc_generation(&self, by: u64) {
        self.offset.fetch_add(by, Ordering::AcqRel);
    }

    fn generation(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }
}

/// Offset annotation that keeps the root at [`ROOT_INODE`] in every generation, as NFS
/// export tables require a stable root.
#[derive(Debug, Default)]
pub struct InodeNfsGenerationAnnotation {
    offset: AtomicU64,
}

impl InodeNfsGenerationAnnotation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl InodeAnnotation for InodeNfsGenerationAnnotation {
    fn valid_inode(&self, inode: u64) -> bool {
        inode == ROOT_INODE || inode >= self.offset.load(Ordering::Acquire) + ROOT_INODE
    }

    fn annotate(&self, raw: u64) -> u64 {
        if raw <= ROOT_INODE {
            return ROOT_INODE;
        }
        raw + self.offset.load(Ordering::Acquire)
    }

    fn strip(&self, inode: u64) -> u64 {
        if inode <= ROOT_INODE {
            return ROOT_INODE;
        }
        inode.saturating_sub(self.offset.load(Ordering::Acquire))
    }

    fn inc_generation(&self, by: u64) {
        self.offset.fetch_add(by, Ordering::AcqRel);
    }

    fn generation(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }
}
