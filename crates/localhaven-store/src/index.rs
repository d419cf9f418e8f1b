//! The asset index: `<root>/index.json`, a JSON object of asset ID to asset.
//!
//! The index is loaded once at open and rewritten wholesale on every
//! mutation through a temp file, fsync and rename, so a crash leaves either
//! the old or the new index on disk.

use localhaven_types::Asset;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::error::{StoreError, StoreResult};

/// File name of the index under the store root.
pub const INDEX_FILENAME: &str = "index.json";

/// In-memory index contents.
pub type AssetIndex = BTreeMap<String, Asset>;

/// Writes `bytes` to `path` via `<path>.tmp`, fsync and rename, then
/// fsyncs the parent directory so the rename itself is durable.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let tmp_path = tmp_path_for(path);
    {
        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(bytes)?;
        tmp_file.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Location of the index file.
#[derive(Debug, Clone)]
pub struct IndexFile {
    path: PathBuf,
}

impl IndexFile {
    /// Index file under `root`.
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(INDEX_FILENAME),
        }
    }

    /// Path of the index file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the index. A missing file is an empty index; an unreadable one
    /// is [`StoreError::IndexCorrupted`]. A stale temp file from an
    /// interrupted write is removed.
    pub fn load(&self) -> StoreResult<AssetIndex> {
        let tmp_path = tmp_path_for(&self.path);
        match fs::remove_file(&tmp_path) {
            Ok(()) => info!(path = %tmp_path.display(), "removed stale index temp file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(AssetIndex::new()),
            Err(e) => return Err(e.into()),
        };

        let index: AssetIndex = serde_json::from_slice(&contents).map_err(|e| {
            error!(path = %self.path.display(), error = %e, "asset index is corrupted");
            StoreError::IndexCorrupted {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        if let Some((key, asset)) = index.iter().find(|(key, asset)| **key != asset.id) {
            return Err(StoreError::IndexCorrupted {
                path: self.path.display().to_string(),
                reason: format!("entry {key} holds asset {}", asset.id),
            });
        }
        Ok(index)
    }

    /// Replaces the on-disk index with `index`.
    pub fn persist(&self, index: &AssetIndex) -> StoreResult<()> {
        let encoded = serde_json::to_vec_pretty(index)?;
        write_atomic(&self.path, &encoded)?;
        debug!(path = %self.path.display(), assets = index.len(), "persisted asset index");
        Ok(())
    }
}
