#![allow(dead_code, missing_docs, clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use catalog_fs::catalog::{
    Catalog, CatalogContext, CatalogCounters, CatalogError, CatalogLoader, CatalogNode,
    CatalogPath, ContentHash, DirectoryEntry, EntryFlags, EntryPerms, EntryType, FileChunk,
    HashAlgorithm, LoadReturn, NestedCatalogRef, XattrList,
};
use catalog_fs::catalog::hash::DIGEST_LEN;
use catalog_fs::{CatalogManager, StatisticsRegistry};

/// A distinct hash per test catalog.
pub fn hash(n: u8) -> ContentHash {
    ContentHash::new(HashAlgorithm::Sha1, [n; DIGEST_LEN])
}

pub fn path(p: &str) -> CatalogPath {
    CatalogPath::new(p)
}

fn make_entry(path: &CatalogPath, row: u64, etype: EntryType, size: u64) -> DirectoryEntry {
    DirectoryEntry {
        name: path.file_name().unwrap_or_default().to_owned(),
        inode: row,
        etype,
        permissions: EntryPerms::OWNER_READ | EntryPerms::GROUP_READ | EntryPerms::OTHER_READ,
        size,
        mtime: SystemTime::UNIX_EPOCH,
        uid: 1000,
        gid: 1000,
        nlink: 1,
        symlink: None,
        content_hash: None,
        flags: EntryFlags::empty(),
    }
}

/// Contents of one catalog, shared by every `MockCatalog` opened from it.
#[derive(Debug, Default)]
pub struct MockCatalogData {
    pub revision: u64,
    pub last_modified: u64,
    pub ttl: Option<Duration>,
    pub voms_authz: Option<String>,
    pub volatile: bool,
    pub memory: u64,
    /// Row ids are positions in this list, starting at 1.
    pub rows: Vec<CatalogPath>,
    pub entries: BTreeMap<CatalogPath, DirectoryEntry>,
    pub nested: Vec<NestedCatalogRef>,
    pub xattrs: BTreeMap<CatalogPath, XattrList>,
    pub chunks: BTreeMap<CatalogPath, Vec<FileChunk>>,
}

/// Builds a `MockCatalogData`. Its own root directory is always row 1.
pub struct CatalogBuilder {
    data: MockCatalogData,
}

impl CatalogBuilder {
    pub fn new(mountpoint: &str) -> Self {
        let mut builder = Self {
            data: MockCatalogData {
                revision: 1,
                memory: 1024,
                ..MockCatalogData::default()
            },
        };
        let root = path(mountpoint);
        let flags = if root.is_root() {
            EntryFlags::empty()
        } else {
            EntryFlags::NESTED_ROOT
        };
        builder.push(&root, EntryType::Directory, 4096, |e| e.flags = flags);
        builder
    }

    fn push(
        &mut self,
        p: &CatalogPath,
        etype: EntryType,
        size: u64,
        tweak: impl FnOnce(&mut DirectoryEntry),
    ) {
        self.data.rows.push(p.clone());
        let mut entry = make_entry(p, self.data.rows.len() as u64, etype, size);
        tweak(&mut entry);
        self.data.entries.insert(p.clone(), entry);
    }

    pub fn revision(mut self, revision: u64) -> Self {
        self.data.revision = revision;
        self.data.last_modified = 1_700_000_000 + revision;
        self
    }

    pub fn dir(mut self, p: &str) -> Self {
        self.push(&path(p), EntryType::Directory, 4096, |_| {});
        self
    }

    pub fn file(mut self, p: &str, size: u64) -> Self {
        self.push(&path(p), EntryType::File, size, |_| {});
        self
    }

    pub fn symlink(mut self, p: &str, target: &str) -> Self {
        let target = target.to_owned();
        self.push(&path(p), EntryType::Symlink, target.len() as u64, |e| {
            e.symlink = Some(target);
        });
        self
    }

    /// A transition point in this catalog plus the reference to the nested catalog.
    pub fn nested(mut self, p: &str, hash: ContentHash) -> Self {
        let mountpoint = path(p);
        self.push(&mountpoint, EntryType::Directory, 4096, |e| {
            e.flags = EntryFlags::NESTED_MOUNTPOINT;
        });
        self.data.nested.push(NestedCatalogRef {
            mountpoint,
            hash,
            size: 2048,
        });
        self
    }

    pub fn xattr(mut self, p: &str, key: &str, value: &str) -> Self {
        self.data
            .xattrs
            .entry(path(p))
            .or_default()
            .set(key, value.as_bytes());
        self
    }

    pub fn chunks(mut self, p: &str, chunks: Vec<FileChunk>) -> Self {
        self.data.chunks.insert(path(p), chunks);
        self
    }

    pub fn memory(mut self, bytes: u64) -> Self {
        self.data.memory = bytes;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.data.ttl = Some(ttl);
        self
    }

    pub fn voms_authz(mut self, authz: &str) -> Self {
        self.data.voms_authz = Some(authz.to_owned());
        self
    }

    pub fn volatile(mut self) -> Self {
        self.data.volatile = true;
        self
    }

    pub fn build(self) -> Arc<MockCatalogData> {
        Arc::new(self.data)
    }
}

type Repo = Arc<Mutex<HashMap<ContentHash, Arc<MockCatalogData>>>>;

/// A catalog that reads from the mock repository once opened.
#[derive(Debug)]
pub struct MockCatalog {
    pub mountpoint: CatalogPath,
    pub hash: ContentHash,
    repo: Repo,
    data: Option<Arc<MockCatalogData>>,
}

impl MockCatalog {
    fn data(&self) -> &MockCatalogData {
        self.data.as_deref().unwrap()
    }
}

impl Catalog for MockCatalog {
    fn open_database(&mut self, db_path: &Path) -> Result<(), CatalogError> {
        if db_path != Path::new(&self.hash.to_string()) {
            return Err(CatalogError::Open {
                path: db_path.to_path_buf(),
                reason: "unexpected path".to_owned(),
            });
        }
        let data = self.repo.lock().unwrap().get(&self.hash).cloned();
        self.data = Some(data.ok_or_else(|| CatalogError::Corrupt(self.hash.to_string()))?);
        Ok(())
    }

    fn max_row_id(&self) -> u64 {
        self.data().rows.len() as u64
    }

    fn revision(&self) -> u64 {
        self.data().revision
    }

    fn last_modified(&self) -> u64 {
        self.data().last_modified
    }

    fn ttl(&self) -> Option<Duration> {
        self.data().ttl
    }

    fn voms_authz(&self) -> Option<String> {
        self.data().voms_authz.clone()
    }

    fn is_volatile(&self) -> bool {
        self.data().volatile
    }

    fn lookup_path(&self, path: &CatalogPath) -> Option<DirectoryEntry> {
        self.data().entries.get(path).cloned()
    }

    fn lookup_row(&self, row_id: u64) -> Option<DirectoryEntry> {
        let index = usize::try_from(row_id.checked_sub(1)?).ok()?;
        let path = self.data().rows.get(index)?;
        self.lookup_path(path)
    }

    fn listing(&self, path: &CatalogPath) -> Option<Vec<DirectoryEntry>> {
        let data = self.data();
        if data.entries.get(path)?.etype != EntryType::Directory {
            return None;
        }
        Some(
            data.entries
                .iter()
                .filter(|(p, _)| p.parent().as_ref() == Some(path))
                .map(|(_, e)| e.clone())
                .collect(),
        )
    }

    fn lookup_xattrs(&self, path: &CatalogPath) -> Option<XattrList> {
        self.data().xattrs.get(path).cloned()
    }

    fn list_file_chunks(
        &self,
        path: &CatalogPath,
        _algorithm: HashAlgorithm,
    ) -> Option<Vec<FileChunk>> {
        self.data().chunks.get(path).cloned()
    }

    fn list_nested_catalogs(&self) -> Vec<NestedCatalogRef> {
        self.data().nested.clone()
    }

    fn counters(&self) -> CatalogCounters {
        let data = self.data();
        let mut counters = CatalogCounters::default();
        for entry in data.entries.values() {
            match entry.etype {
                EntryType::File => {
                    counters.regular_files += 1;
                    counters.file_bytes += entry.size;
                }
                EntryType::Directory => counters.directories += 1,
                EntryType::Symlink => counters.symlinks += 1,
                _ => {}
            }
        }
        counters.nested_catalogs = data.nested.len() as u64;
        counters
    }

    fn memory_usage(&self) -> u64 {
        self.data().memory
    }
}

/// In-memory repository with failure injection and hook recording.
#[derive(Debug, Default)]
pub struct MockLoader {
    repo: Repo,
    current_root: Mutex<Option<ContentHash>>,
    mounted_root: Mutex<Option<ContentHash>>,
    failing: Mutex<HashSet<ContentHash>>,
    no_space: Mutex<HashSet<ContentHash>>,
    delay: Mutex<Option<Duration>>,
    stage_delay: Mutex<Option<Duration>>,
    loads: Mutex<Vec<ContentHash>>,
    stages: AtomicUsize,
    activated: Mutex<Vec<CatalogPath>>,
    unloaded: Mutex<Vec<CatalogPath>>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_catalog(&self, hash: ContentHash, data: Arc<MockCatalogData>) {
        self.repo.lock().unwrap().insert(hash, data);
    }

    /// Make `hash` the root the "server" currently publishes.
    pub fn publish_root(&self, hash: ContentHash) {
        *self.current_root.lock().unwrap() = Some(hash);
    }

    pub fn fail(&self, hash: ContentHash) {
        self.failing.lock().unwrap().insert(hash);
    }

    pub fn no_space(&self, hash: ContentHash) {
        self.no_space.lock().unwrap().insert(hash);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Delay applied to prefetches only, before the regular load.
    pub fn set_stage_delay(&self, delay: Duration) {
        *self.stage_delay.lock().unwrap() = Some(delay);
    }

    pub fn load_count(&self, hash: ContentHash) -> usize {
        self.loads.lock().unwrap().iter().filter(|h| **h == hash).count()
    }

    pub fn stage_count(&self) -> usize {
        self.stages.load(Ordering::SeqCst)
    }

    pub fn activated(&self) -> Vec<CatalogPath> {
        self.activated.lock().unwrap().clone()
    }

    pub fn unloaded(&self) -> Vec<CatalogPath> {
        self.unloaded.lock().unwrap().clone()
    }
}

impl CatalogLoader for MockLoader {
    type Catalog = MockCatalog;

    async fn get_new_root_catalog_context(&self, ctx: &mut CatalogContext) -> LoadReturn {
        let Some(current) = *self.current_root.lock().unwrap() else {
            return LoadReturn::Fail;
        };
        ctx.hash = Some(current);
        ctx.root_ctlg_revision = self
            .repo
            .lock()
            .unwrap()
            .get(&current)
            .map(|data| data.revision);

        if *self.mounted_root.lock().unwrap() == Some(current) {
            LoadReturn::UpToDate
        } else {
            LoadReturn::New
        }
    }

    async fn load_catalog_by_hash(&self, ctx: &mut CatalogContext) -> LoadReturn {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let Some(hash) = ctx.hash else {
            return LoadReturn::Fail;
        };
        self.loads.lock().unwrap().push(hash);
        if self.failing.lock().unwrap().contains(&hash) {
            return LoadReturn::Fail;
        }
        if self.no_space.lock().unwrap().contains(&hash) {
            return LoadReturn::NoSpace;
        }
        if !self.repo.lock().unwrap().contains_key(&hash) {
            return LoadReturn::Fail;
        }

        ctx.sqlite_path = PathBuf::from(hash.to_string());
        LoadReturn::New
    }

    fn create_catalog(
        &self,
        mountpoint: &CatalogPath,
        hash: &ContentHash,
        _parent: Option<&MockCatalog>,
    ) -> MockCatalog {
        MockCatalog {
            mountpoint: mountpoint.clone(),
            hash: *hash,
            repo: Arc::clone(&self.repo),
            data: None,
        }
    }

    fn activate_catalog(&self, node: &CatalogNode<MockCatalog>) {
        if node.is_root() {
            *self.mounted_root.lock().unwrap() = Some(*node.hash());
        }
        self.activated.lock().unwrap().push(node.mountpoint().clone());
    }

    fn unload_catalog(&self, node: &CatalogNode<MockCatalog>) {
        self.unloaded.lock().unwrap().push(node.mountpoint().clone());
    }

    async fn stage_nested_catalog_by_hash(&self, ctx: &mut CatalogContext) -> LoadReturn {
        self.stages.fetch_add(1, Ordering::SeqCst);
        let delay = *self.stage_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.load_catalog_by_hash(ctx).await
    }
}

pub const ROOT: u8 = 1;
pub const NESTED_A: u8 = 2;
pub const NESTED_B: u8 = 3;
pub const NESTED_C: u8 = 4;
pub const NESTED_DEEP: u8 = 5;

/// The repository most tests run against:
///
/// ```text
/// /            root
/// /README
/// /link        -> $(CATALOG_FS_TEST_UNSET_VAR:/opt/fallback)/bin
/// /a           nested, containing /a/file1 and nested /a/deep
/// /b           nested, containing /b/file
/// /c           nested, containing /c/file
/// ```
pub fn standard_loader() -> Arc<MockLoader> {
    let loader = MockLoader::new();
    loader.add_catalog(
        hash(ROOT),
        CatalogBuilder::new("/")
            .revision(7)
            .file("/README", 42)
            .symlink("/link", "$(CATALOG_FS_TEST_UNSET_VAR:/opt/fallback)/bin")
            .nested("/a", hash(NESTED_A))
            .nested("/b", hash(NESTED_B))
            .nested("/c", hash(NESTED_C))
            .xattr("/README", "user.origin", "upstream")
            .build(),
    );
    loader.add_catalog(
        hash(NESTED_A),
        CatalogBuilder::new("/a")
            .file("/a/file1", 10)
            .nested("/a/deep", hash(NESTED_DEEP))
            .build(),
    );
    loader.add_catalog(
        hash(NESTED_B),
        CatalogBuilder::new("/b")
            .file("/b/file", 100)
            .chunks(
                "/b/file",
                vec![
                    FileChunk {
                        hash: hash(90),
                        offset: 0,
                        size: 64,
                    },
                    FileChunk {
                        hash: hash(91),
                        offset: 64,
                        size: 36,
                    },
                ],
            )
            .build(),
    );
    loader.add_catalog(
        hash(NESTED_C),
        CatalogBuilder::new("/c").file("/c/file", 1).build(),
    );
    loader.add_catalog(
        hash(NESTED_DEEP),
        CatalogBuilder::new("/a/deep").file("/a/deep/leaf", 5).build(),
    );
    loader.publish_root(hash(ROOT));
    Arc::new(loader)
}

/// A manager over `loader` with its root already mounted.
pub async fn mounted(loader: &Arc<MockLoader>) -> (CatalogManager<MockLoader>, StatisticsRegistry) {
    let registry = StatisticsRegistry::new();
    let manager = CatalogManager::new(Arc::clone(loader), &registry);
    manager.init().await.unwrap();
    (manager, registry)
}

pub fn counter(registry: &StatisticsRegistry, name: &str) -> i64 {
    registry.lookup(name).unwrap().get()
}
