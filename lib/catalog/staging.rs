//! Prefetched nested catalogs waiting to be mounted.
//!
//! Staging runs with no tree lock held. Concurrent requests to stage the same catalog join a
//! single in-flight fetch through a [`Shared`] future. The mount step later
//! [`take`](StagingCache::take)s the result if it is still there; nothing depends on it being
//! there.

use std::panic::AssertUnwindSafe;
use std::{future::Future, pin::Pin};

use futures::FutureExt as _;
use futures::future::Shared;
use tracing::trace;

use super::context::CatalogContext;
use super::hash::ContentHash;
use super::path::CatalogPath;

type SharedStage = Shared<Pin<Box<dyn Future<Output = Option<CatalogContext>> + Send>>>;

/// Identifies one staged catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StageKey {
    pub hash: ContentHash,
    pub mountpoint: CatalogPath,
}

impl StageKey {
    #[must_use]
    pub fn new(hash: ContentHash, mountpoint: CatalogPath) -> Self {
        Self { hash, mountpoint }
    }
}

/// `InFlight` while the loader is fetching, then promoted to `Ready`.
///
/// The shared future yields `None` when the fetch failed or panicked; the entry is removed in
/// that case so a later caller can retry.
enum Slot {
    InFlight(SharedStage),
    Ready(CatalogContext),
}

/// Deduplicating cache of staged load results.
#[derive(Default)]
pub struct StagingCache {
    map: scc::HashMap<StageKey, Slot>,
}

impl StagingCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `key` by running `fetch`, unless it is already staged or being staged.
    ///
    /// Returns the staged context, or `None` if the fetch failed.
    pub async fn stage<F, Fut>(&self, key: StageKey, fetch: F) -> Option<CatalogContext>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<CatalogContext>> + Send + 'static,
    {
        let shared = match self.map.entry_async(key.clone()).await {
            scc::hash_map::Entry::Occupied(occ) => match occ.get() {
                Slot::Ready(ctx) => return Some(ctx.clone()),
                Slot::InFlight(shared) => shared.clone(),
            },
            scc::hash_map::Entry::Vacant(vac) => {
                let shared = Self::make_shared(fetch);
                vac.insert_entry(Slot::InFlight(shared.clone()));
                shared
            }
        };

        self.await_shared(&key, shared).await
    }

    /// Remove and return the staged result for `key`, waiting for an in-flight fetch.
    pub async fn take(&self, key: &StageKey) -> Option<CatalogContext> {
        let existing = self
            .map
            .read_async(key, |_, slot| match slot {
                Slot::Ready(ctx) => Ok(ctx.clone()),
                Slot::InFlight(shared) => Err(shared.clone()),
            })
            .await?;

        let staged = match existing {
            Ok(ctx) => Some(ctx),
            Err(shared) => shared.await,
        };
        drop(self.map.remove_sync(key));
        trace!(mountpoint = %key.mountpoint, hit = staged.is_some(), "took staged catalog");
        staged
    }

    /// Drop a staged result nobody is going to mount.
    pub fn discard(&self, key: &StageKey) {
        drop(self.map.remove_if_sync(key, |slot| matches!(slot, Slot::Ready(_))));
    }

    /// Drop every staged result. In-flight fetches finish but are not recorded.
    pub fn clear(&self) {
        self.map.retain_sync(|_, _| false);
    }

    #[must_use]
    pub fn contains(&self, key: &StageKey) -> bool {
        self.map.read_sync(key, |_, _| ()).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    async fn await_shared(&self, key: &StageKey, shared: SharedStage) -> Option<CatalogContext> {
        let result = shared.await;

        match &result {
            Some(ctx) => {
                self.map
                    .update_async(key, |_, slot| {
                        if matches!(slot, Slot::InFlight(_)) {
                            *slot = Slot::Ready(ctx.clone());
                        }
                    })
                    .await;
            }
            None => drop(
                self.map
                    .remove_if_sync(key, |slot| matches!(slot, Slot::InFlight(_))),
            ),
        }

        result
    }

    fn make_shared<F, Fut>(fetch: F) -> SharedStage
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<CatalogContext>> + Send + 'static,
    {
        let fut = AssertUnwindSafe(fetch()).catch_unwind();
        let boxed: Pin<Box<dyn Future<Output = Option<CatalogContext>> + Send>> =
            Box::pin(async move { fut.await.ok().flatten() });
        boxed.shared()
    }
}
