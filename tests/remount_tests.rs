#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytesize::ByteSize;
use catalog_fs::catalog::{InodeNfsGenerationAnnotation, LoadReturn, MountError, ROOT_INODE};
use catalog_fs::config::InodeAnnotationKind;
use catalog_fs::{CatalogManager, LookupOptions, ManagerConfig, StatisticsRegistry};
use common::{CatalogBuilder, MockLoader, ROOT, counter, hash, mounted, path, standard_loader};

const NEXT_ROOT: u8 = 10;

fn publish_next_root(loader: &MockLoader) {
    loader.add_catalog(
        hash(NEXT_ROOT),
        CatalogBuilder::new("/")
            .revision(8)
            .file("/NEWS", 3)
            .ttl(Duration::from_secs(60))
            .build(),
    );
    loader.publish_root(hash(NEXT_ROOT));
}

async fn with_generations(loader: &Arc<MockLoader>) -> CatalogManager<MockLoader> {
    let registry = StatisticsRegistry::new();
    let manager = CatalogManager::with_config(Arc::clone(loader), &registry, &ManagerConfig::default());
    manager.init().await.unwrap();
    manager
}

#[tokio::test]
async fn init_reports_root_metadata() {
    let loader = standard_loader();
    let (manager, registry) = mounted(&loader).await;

    assert_eq!(manager.revision().await, 7);
    assert_eq!(manager.timestamp().await, 1_700_000_007);
    assert_eq!(manager.root_hash().await, Some(hash(ROOT)));
    assert!(!manager.has_explicit_ttl().await);
    assert_eq!(manager.ttl().await, Duration::from_secs(240));
    assert!(!manager.is_volatile());
    assert_eq!(counter(&registry, "catalog_revision"), 7);
    assert_eq!(loader.activated(), vec![path("/")]);
}

#[tokio::test]
async fn init_without_a_published_root_fails() {
    let loader = Arc::new(MockLoader::new());
    let registry = StatisticsRegistry::new();
    let manager = CatalogManager::new(Arc::clone(&loader), &registry);

    let err = manager.init().await.unwrap_err();
    assert!(matches!(err, MountError::LoadFailed { .. }));
    assert_eq!(LoadReturn::from(err), LoadReturn::Fail);
    assert_eq!(manager.num_catalogs().await, 0);
}

#[tokio::test]
async fn remount_without_change_is_up_to_date() {
    let loader = standard_loader();
    let (manager, _registry) = mounted(&loader).await;

    assert_eq!(manager.remount_dryrun().await, LoadReturn::UpToDate);
    assert_eq!(manager.remount().await, LoadReturn::UpToDate);
    assert_eq!(manager.incarnation(), 0);
}

#[tokio::test]
async fn remount_swaps_the_whole_tree() {
    let loader = standard_loader();
    let (manager, registry) = mounted(&loader).await;
    manager
        .lookup_path(&path("/a/file1"), LookupOptions::DEFAULT)
        .await
        .unwrap();

    publish_next_root(&loader);
    assert_eq!(manager.remount_dryrun().await, LoadReturn::New);
    assert_eq!(manager.revision().await, 7, "dry run leaves the tree alone");

    assert_eq!(manager.remount().await, LoadReturn::New);
    assert_eq!(manager.revision().await, 8);
    assert_eq!(manager.incarnation(), 1);
    assert_eq!(manager.attached_mountpoints().await, vec![path("/")]);
    assert_eq!(manager.ttl().await, Duration::from_secs(60));
    assert_eq!(counter(&registry, "catalog_revision"), 8);

    assert!(
        manager
            .lookup_path(&path("/NEWS"), LookupOptions::DEFAULT)
            .await
            .is_some()
    );
    assert!(
        manager
            .lookup_path(&path("/README"), LookupOptions::DEFAULT)
            .await
            .is_none()
    );

    let unloaded = loader.unloaded();
    assert_eq!(unloaded, vec![path("/a"), path("/")], "children detach before parents");
}

#[tokio::test]
async fn remount_invalidates_previous_inodes() {
    let loader = standard_loader();
    let manager = with_generations(&loader).await;

    let old = manager
        .lookup_path(&path("/README"), LookupOptions::DEFAULT)
        .await
        .unwrap();
    assert!(manager.valid_inode(old.inode));

    publish_next_root(&loader);
    assert_eq!(manager.remount().await, LoadReturn::New);

    assert!(!manager.valid_inode(old.inode));
    assert!(manager.lookup_inode(old.inode).await.is_none());

    let news = manager
        .lookup_path(&path("/NEWS"), LookupOptions::DEFAULT)
        .await
        .unwrap();
    assert!(manager.valid_inode(news.inode));
    assert!(news.inode > old.inode);
    assert_eq!(manager.lookup_inode(news.inode).await.unwrap().name, "NEWS");
}

#[tokio::test]
async fn failed_remount_keeps_everything() {
    let loader = standard_loader();
    let manager = with_generations(&loader).await;
    let before = manager
        .lookup_path(&path("/README"), LookupOptions::DEFAULT)
        .await
        .unwrap();
    let generation = manager.generation();

    publish_next_root(&loader);
    loader.fail(hash(NEXT_ROOT));
    assert_eq!(manager.remount().await, LoadReturn::Fail);

    assert_eq!(manager.revision().await, 7);
    assert_eq!(manager.root_hash().await, Some(hash(ROOT)));
    assert_eq!(manager.generation(), generation);
    assert_eq!(manager.incarnation(), 0);
    let after = manager
        .lookup_path(&path("/README"), LookupOptions::DEFAULT)
        .await
        .unwrap();
    assert_eq!(before.inode, after.inode);
    assert!(loader.unloaded().is_empty());
}

#[tokio::test]
async fn remount_without_space_keeps_everything() {
    let loader = standard_loader();
    let (manager, _registry) = mounted(&loader).await;

    publish_next_root(&loader);
    loader.no_space(hash(NEXT_ROOT));
    assert_eq!(manager.remount().await, LoadReturn::NoSpace);
    assert_eq!(manager.root_hash().await, Some(hash(ROOT)));
}

#[tokio::test]
async fn oversized_root_is_rejected() {
    let loader = standard_loader();
    loader.add_catalog(
        hash(NEXT_ROOT),
        CatalogBuilder::new("/").memory(10 * 1024 * 1024).build(),
    );
    let registry = StatisticsRegistry::new();
    let config = ManagerConfig {
        backing_mem_limit: ByteSize::mib(1),
        ..ManagerConfig::default()
    };
    let manager = CatalogManager::with_config(Arc::clone(&loader), &registry, &config);
    manager.init().await.unwrap();

    assert_eq!(manager.change_root(&hash(NEXT_ROOT)).await, LoadReturn::NoSpace);
    assert_eq!(manager.root_hash().await, Some(hash(ROOT)));
}

#[tokio::test]
async fn change_root_pins_a_specific_revision() {
    let loader = standard_loader();
    let (manager, _registry) = mounted(&loader).await;
    loader.add_catalog(
        hash(NEXT_ROOT),
        CatalogBuilder::new("/").revision(3).build(),
    );

    assert_eq!(manager.change_root(&hash(NEXT_ROOT)).await, LoadReturn::New);
    assert_eq!(manager.revision().await, 3);
    assert_eq!(manager.change_root(&hash(NEXT_ROOT)).await, LoadReturn::UpToDate);

    assert_eq!(manager.remount().await, LoadReturn::New, "server root differs again");
    assert_eq!(manager.root_hash().await, Some(hash(ROOT)));
    assert_eq!(manager.incarnation(), 2);
}

#[tokio::test]
async fn nfs_annotation_keeps_the_root_inode() {
    let loader = standard_loader();
    let registry = StatisticsRegistry::new();
    let config = ManagerConfig {
        inode_annotation: InodeAnnotationKind::NfsGeneration,
        ..ManagerConfig::default()
    };
    let manager = CatalogManager::with_config(Arc::clone(&loader), &registry, &config);
    manager.init().await.unwrap();
    assert_eq!(manager.root_inode(), ROOT_INODE);

    publish_next_root(&loader);
    assert_eq!(manager.remount().await, LoadReturn::New);
    assert_eq!(manager.root_inode(), ROOT_INODE);
    assert!(manager.valid_inode(ROOT_INODE));
    let root = manager
        .lookup_path(&path("/"), LookupOptions::DEFAULT)
        .await
        .unwrap();
    assert_eq!(root.inode, ROOT_INODE);
}

#[tokio::test]
async fn annotation_can_only_be_installed_once() {
    let loader = standard_loader();
    let (manager, _registry) = mounted(&loader).await;

    manager
        .set_inode_annotation(Box::new(InodeNfsGenerationAnnotation::new()))
        .unwrap();
    assert!(
        manager
            .set_inode_annotation(Box::new(InodeNfsGenerationAnnotation::new()))
            .is_err()
    );
}

#[tokio::test]
async fn root_metadata_flags() {
    let loader = Arc::new(MockLoader::new());
    loader.add_catalog(
        hash(ROOT),
        CatalogBuilder::new("/")
            .voms_authz("/atlas/Role=production")
            .volatile()
            .ttl(Duration::from_secs(15))
            .build(),
    );
    loader.publish_root(hash(ROOT));
    let (manager, _registry) = mounted(&loader).await;

    assert!(manager.is_volatile());
    assert!(manager.has_explicit_ttl().await);
    assert_eq!(manager.ttl().await, Duration::from_secs(15));
    assert_eq!(
        manager.voms_authz().await.as_deref(),
        Some("/atlas/Role=production")
    );
    assert!(manager.print_all_mem_statistics().await.contains("total:"));
}
