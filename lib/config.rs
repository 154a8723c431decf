//! Catalog manager configuration.
//!
//! Settings may be specified in a TOML file. Every field has a default, so an empty file is a
//! valid configuration.

use std::path::Path;
use std::time::Duration;

use bytesize::ByteSize;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

fn default_backing_mem_limit() -> ByteSize {
    ByteSize::mib(1)
}

fn default_ttl_secs() -> u64 {
    240
}

/// Which inode annotation the manager installs at construction time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InodeAnnotationKind {
    /// Raw inodes; a root swap does not invalidate previously issued numbers.
    None,
    /// Plain generation offset.
    #[default]
    Generation,
    /// Generation offset with a fixed root inode.
    NfsGeneration,
}

/// Catalog manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManagerConfig {
    /// Maximum number of attached nested catalogs before siblings are evicted. Zero disables
    /// eviction.
    #[serde(default)]
    pub catalog_watermark: usize,

    /// Memory a single backing catalog may use. Zero disables the check.
    #[serde(default = "default_backing_mem_limit")]
    pub backing_mem_limit: ByteSize,

    /// TTL reported for root catalogs that do not carry an explicit one.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    #[serde(default)]
    pub inode_annotation: InodeAnnotationKind,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            catalog_watermark: 0,
            backing_mem_limit: default_backing_mem_limit(),
            default_ttl_secs: default_ttl_secs(),
            inode_annotation: InodeAnnotationKind::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation errors: {0:?}")]
    ValidationErrors(Vec<String>),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ManagerConfig {
    /// Validate the correctness of the configuration.
    ///
    /// Returns:
    /// - `Ok(())` if the configuration is valid.
    /// - `Err(Vec<String>)` containing a list of validation error messages otherwise.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.default_ttl_secs == 0 {
            errors.push("default-ttl-secs must be greater than zero.".to_owned());
        }

        if u32::try_from(self.default_ttl_secs).is_err() {
            errors.push(format!(
                "default-ttl-secs {} does not fit in 32 bits.",
                self.default_ttl_secs
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Backing memory limit in bytes; zero means unlimited.
    #[must_use]
    pub fn backing_mem_limit_bytes(&self) -> u64 {
        self.backing_mem_limit.as_u64()
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate().map_err(ConfigError::ValidationErrors)?;
        Ok(config)
    }

    /// Loads and validates config from a single TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = ?path, "Loading configuration file.");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
