use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::stats::Counter;

/// Reader/writer lock whose write acquisitions are counted and timed.
///
/// There is no upgrade: a reader that needs to mutate drops its guard, calls
/// [`write`](Self::write), and re-validates whatever it observed.
#[derive(Debug)]
pub struct TreeLock<T> {
    inner: RwLock<T>,
    n_write_lock: Arc<Counter>,
    ns_write_lock: Arc<Counter>,
}

impl<T> TreeLock<T> {
    pub fn new(value: T, n_write_lock: Arc<Counter>, ns_write_lock: Arc<Counter>) -> Self {
        Self {
            inner: RwLock::new(value),
            n_write_lock,
            ns_write_lock,
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, T> {
        let start = Instant::now();
        let guard = self.inner.write().await;
        let waited = i64::try_from(start.elapsed().as_nanos()).unwrap_or(i64::MAX);
        self.n_write_lock.inc();
        self.ns_write_lock.xadd(waited);
        guard
    }

    /// Exclusive access without locking, for teardown.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}
