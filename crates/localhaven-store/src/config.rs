//! Chunk store configuration.
//!
//! Quota and TTL values are carried for external enforcement; the store only
//! uses `root_path` and `chunk_size_kb`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{StoreError, StoreResult};

/// Operational knobs for a chunk store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding `index.json` and `chunks/`.
    pub root_path: PathBuf,
    /// Chunk size in KiB.
    pub chunk_size_kb: usize,
    /// Total storage quota in GiB.
    pub max_storage_gb: u64,
    /// Per-asset size limit in MiB.
    pub max_file_size_mb: u64,
    /// Cache TTL in hours.
    pub cache_ttl_hours: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("./data"),
            chunk_size_kb: 512,
            max_storage_gb: 10,
            max_file_size_mb: 100,
            cache_ttl_hours: 24,
        }
    }
}

impl StoreConfig {
    /// Config rooted at `root` with default limits.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root.into(),
            ..Default::default()
        }
    }

    /// Chunk size in bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size_kb.saturating_mul(1024)
    }

    /// Total storage quota in bytes.
    pub fn max_storage_bytes(&self) -> u64 {
        self.max_storage_gb.saturating_mul(1024 * 1024 * 1024)
    }

    /// Per-asset size limit in bytes.
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    /// Rejects settings the store cannot run with.
    pub fn validate(&self) -> StoreResult<()> {
        if self.chunk_size_kb == 0 {
            return Err(StoreError::InvalidConfig {
                reason: "chunk_size_kb must be greater than zero".to_string(),
            });
        }
        if self.root_path.as_os_str().is_empty() {
            return Err(StoreError::InvalidConfig {
                reason: "root_path must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
