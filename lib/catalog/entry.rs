//! Records returned by catalog lookups.

use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::time::SystemTime;

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use super::hash::ContentHash;
use super::path::CatalogPath;

bitflags! {
    /// Permission bits of an entry, as stored in the catalog.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EntryPerms: u16 {
        /// Other: execute permission.
        const OTHER_EXECUTE = 1 << 0;
        /// Other: write permission.
        const OTHER_WRITE   = 1 << 1;
        /// Other: read permission.
        const OTHER_READ    = 1 << 2;

        /// Group: execute permission.
        const GROUP_EXECUTE = 1 << 3;
        /// Group: write permission.
        const GROUP_WRITE   = 1 << 4;
        /// Group: read permission.
        const GROUP_READ    = 1 << 5;

        /// Owner: execute permission.
        const OWNER_EXECUTE = 1 << 6;
        /// Owner: write permission.
        const OWNER_WRITE   = 1 << 7;
        /// Owner: read permission.
        const OWNER_READ    = 1 << 8;

        /// Sticky bit.
        const STICKY        = 1 << 9;
        /// Set-group-ID bit.
        const SETGID        = 1 << 10;
        /// Set-user-ID bit.
        const SETUID        = 1 << 11;
    }
}

bitflags! {
    /// Catalog-level markers on an entry.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct EntryFlags: u8 {
        /// Transition point: a nested catalog is mounted here. Seen in the parent catalog.
        const NESTED_MOUNTPOINT = 1 << 0;
        /// Root directory of a nested catalog. Seen in the nested catalog itself.
        const NESTED_ROOT       = 1 << 1;
        /// Regular file stored as a list of chunks.
        const CHUNKED           = 1 << 2;
        /// Entry carries extended attributes.
        const HAS_XATTRS        = 1 << 3;
        /// Entry is hidden from listings.
        const HIDDEN            = 1 << 4;
    }
}

/// The type of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum EntryType {
    /// A regular file.
    File,
    /// A directory.
    Directory,
    /// A symbolic link.
    Symlink,
}

/// Attributes of an entry without its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryStat {
    pub inode: u64,
    pub etype: EntryType,
    pub permissions: EntryPerms,
    pub size: u64,
    pub mtime: SystemTime,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
}

/// A directory entry.
///
/// Backing catalogs report the entry's row id in `inode`. The manager rewrites it into the
/// owning catalog's inode range before handing the entry to callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectoryEntry {
    pub name: String,
    pub inode: u64,
    pub etype: EntryType,
    pub permissions: EntryPerms,
    pub size: u64,
    pub mtime: SystemTime,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub symlink: Option<String>,
    pub content_hash: Option<ContentHash>,
    pub flags: EntryFlags,
}

impl DirectoryEntry {
    #[must_use]
    pub fn stat(&self) -> EntryStat {
        EntryStat {
            inode: self.inode,
            etype: self.etype,
            permissions: self.permissions,
            size: self.size,
            mtime: self.mtime,
            uid: self.uid,
            gid: self.gid,
            nlink: self.nlink,
        }
    }

    #[must_use]
    pub fn is_nested_mountpoint(&self) -> bool {
        self.flags.contains(EntryFlags::NESTED_MOUNTPOINT)
    }

    #[must_use]
    pub fn is_nested_root(&self) -> bool {
        self.flags.contains(EntryFlags::NESTED_ROOT)
    }
}

/// A listing row: name plus attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatEntry {
    pub name: String,
    pub stat: EntryStat,
}

impl From<&DirectoryEntry> for StatEntry {
    fn from(entry: &DirectoryEntry) -> Self {
        Self {
            name: entry.name.clone(),
            stat: entry.stat(),
        }
    }
}

/// Extended attributes of one entry, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XattrList(BTreeMap<String, Vec<u8>>);

impl XattrList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an attribute.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.0.get(key).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One piece of a chunked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileChunk {
    pub hash: ContentHash,
    pub offset: u64,
    pub size: u64,
}

/// A nested catalog as listed by its parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NestedCatalogRef {
    pub mountpoint: CatalogPath,
    pub hash: ContentHash,
    /// Size of the compressed catalog in bytes; zero when unknown.
    pub size: u64,
}

/// Per-catalog statistics on the subtree a catalog describes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CatalogCounters {
    pub regular_files: u64,
    pub directories: u64,
    pub symlinks: u64,
    pub chunked_files: u64,
    pub nested_catalogs: u64,
    pub file_bytes: u64,
}

impl AddAssign for CatalogCounters {
    fn add_assign(&mut self, rhs: Self) {
        self.regular_files += rhs.regular_files;
        self.directories += rhs.directories;
        self.symlinks += rhs.symlinks;
        self.chunked_files += rhs.chunked_files;
        self.nested_catalogs += rhs.nested_catalogs;
        self.file_bytes += rhs.file_bytes;
    }
}

/// Owner counters of the catalog covering a path, as reported by
/// [`CatalogManager::lookup_counters`](super::CatalogManager::lookup_counters).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtreeCounters {
    pub mountpoint: CatalogPath,
    pub hash: ContentHash,
    pub counters: CatalogCounters,
}

/// Remaps uid or gid values stored in catalogs to local ids. Unmapped ids pass through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerMap(FxHashMap<u32, u32>);

impl OwnerMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, from: u32, to: u32) {
        self.0.insert(from, to);
    }

    #[must_use]
    pub fn map(&self, id: u32) -> u32 {
        self.0.get(&id).copied().unwrap_or(id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(u32, u32)> for OwnerMap {
    fn from_iter<I: IntoIterator<Item = (u32, u32)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Expand `$(VAR)` and `$(VAR:default)` references in a symlink target.
///
/// Unset variables fall back to their default, or to the empty string when none is given.
/// An unterminated `$(` is copied through verbatim.
pub fn expand_symlink<F>(target: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(target.len());
    let mut rest = target;

    while let Some(start) = rest.find("$(") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find(')') else {
            out.push_str(&rest[start..]);
            return out;
        };

        let reference = &after[..end];
        let (name, default) = match reference.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (reference, None),
        };
        match lookup(name) {
            Some(value) => out.push_str(&value),
            None => out.push_str(default.unwrap_or_default()),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

/// [`expand_symlink`] against the process environment.
#[must_use]
pub fn expand_symlink_env(target: &str) -> String {
    expand_symlink(target, |name| std::env::var(name).ok())
}
