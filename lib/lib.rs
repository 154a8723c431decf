//! catalog-fs shared library.
//!
//! Client-side manager for a tree of lazily mounted, content-addressed directory catalogs.

/// Catalog tree, path resolution, inode allocation and the remount protocol.
pub mod catalog;
/// Manager configuration loaded from TOML.
pub mod config;
/// Named counters exposed to an external telemetry collaborator.
pub mod stats;

pub use catalog::{CatalogManager, LoadReturn, LookupOptions};
pub use config::ManagerConfig;
pub use stats::StatisticsRegistry;
