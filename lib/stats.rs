//! Named counters.
//!
//! [`StatisticsRegistry`] is a cheaply cloneable handle to a shared set of [`Counter`]s keyed by
//! name. Components register their counters at construction time and keep the returned
//! [`Arc<Counter>`] for lock-free updates; an external telemetry task reads
//! [`snapshot`](StatisticsRegistry::snapshot)s by name.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::RwLock;

/// A single named 64-bit counter or gauge.
#[derive(Debug)]
pub struct Counter {
    name: String,
    description: String,
    value: AtomicI64,
}

impl Counter {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `delta` and return the previous value.
    pub fn xadd(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::Relaxed)
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Shared registry of counters.
#[derive(Debug, Clone, Default)]
pub struct StatisticsRegistry {
    counters: Arc<RwLock<BTreeMap<String, Arc<Counter>>>>,
}

impl StatisticsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a counter, or return the one already registered under `name`.
    pub fn register(&self, name: &str, description: &str) -> Arc<Counter> {
        if let Some(existing) = self.counters.read().get(name) {
            return Arc::clone(existing);
        }

        let mut counters = self.counters.write();
        Arc::clone(counters.entry(name.to_owned()).or_insert_with(|| {
            Arc::new(Counter {
                name: name.to_owned(),
                description: description.to_owned(),
                value: AtomicI64::new(0),
            })
        }))
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<Counter>> {
        self.counters.read().get(name).cloned()
    }

    /// Current value of every counter, sorted by name.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.counters
            .read()
            .iter()
            .map(|(name, counter)| (name.clone(), counter.get()))
            .collect()
    }

    /// Human-readable `name|value|description` listing, one counter per line.
    #[must_use]
    pub fn print_list(&self) -> String {
        let counters = self.counters.read();
        let mut out = String::new();
        for counter in counters.values() {
            let _ = writeln!(
                out,
                "{}|{}|{}",
                counter.name(),
                counter.get(),
                counter.description()
            );
        }
        out
    }
}

/// Counters maintained by the catalog manager.
#[derive(Debug, Clone)]
pub struct Statistics {
    pub n_lookup_inode: Arc<Counter>,
    pub n_lookup_path: Arc<Counter>,
    pub n_lookup_path_negative: Arc<Counter>,
    pub n_lookup_xattrs: Arc<Counter>,
    pub n_listing: Arc<Counter>,
    pub n_nested_listing: Arc<Counter>,
    pub n_detach_siblings: Arc<Counter>,
    pub n_write_lock: Arc<Counter>,
    pub ns_write_lock: Arc<Counter>,
    pub catalog_revision: Arc<Counter>,
}

impl Statistics {
    #[must_use]
    pub fn new(registry: &StatisticsRegistry) -> Self {
        Self {
            n_lookup_inode: registry.register("catalog_mgr.n_lookup_inode", "Number of inode lookups"),
            n_lookup_path: registry.register("catalog_mgr.n_lookup_path", "Number of path lookups"),
            n_lookup_path_negative: registry.register(
                "catalog_mgr.n_lookup_path_negative",
                "Number of negative path lookups",
            ),
            n_lookup_xattrs: registry
                .register("catalog_mgr.n_lookup_xattrs", "Number of xattrs lookups"),
            n_listing: registry.register("catalog_mgr.n_listing", "Number of listings"),
            n_nested_listing: registry.register(
                "catalog_mgr.n_nested_listing",
                "Number of listings of nested catalogs",
            ),
            n_detach_siblings: registry.register(
                "catalog_mgr.n_detach_siblings",
                "Number of times the catalog watermark was hit",
            ),
            n_write_lock: registry.register("catalog_mgr.n_write_lock", "Number of write locks"),
            ns_write_lock: registry.register(
                "catalog_mgr.ns_write_lock",
                "Nanoseconds spent waiting for write locks",
            ),
            catalog_revision: registry
                .register("catalog_revision", "Revision number of the root file catalog"),
        }
    }
}
