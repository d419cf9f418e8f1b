//! Local chunk store.
//!
//! Layout under the root directory:
//! - `index.json`: every asset record, see [`crate::index`].
//! - `chunks/<asset_id>/<position>.chunk`: raw chunk bytes.
//! - `chunks/<asset_id>/<position>.blake3`: hex fingerprint of the chunk.
//!
//! All mutators serialize on one writer mutex. The in-memory index sits
//! behind a separate `RwLock` that is write-locked only for the final swap
//! after the on-disk index has been replaced, so readers never wait on an
//! upload and never observe a partially created asset.

use localhaven_types::{Asset, Timestamp};
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::chunk::{validate_asset_id, Chunk, ChunkId};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::filter::AssetFilter;
use crate::fingerprint::Fingerprint;
use crate::index::{write_atomic, AssetIndex, IndexFile};

/// Name of the directory holding per-asset chunk directories.
pub const CHUNKS_DIR: &str = "chunks";

/// Aggregate counts over the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Indexed assets.
    pub assets: usize,
    /// Chunks referenced by the index.
    pub chunks: usize,
    /// Sum of asset sizes in bytes.
    pub bytes: u64,
}

/// Durable chunked storage for asset content plus the asset index.
pub struct ChunkStore {
    config: StoreConfig,
    chunks_dir: PathBuf,
    index_file: IndexFile,
    writer: Mutex<()>,
    index: RwLock<AssetIndex>,
}

/// Reads until `buf` is full or the reader is exhausted.
fn fill_chunk(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl ChunkStore {
    /// Opens (creating if needed) the store at `config.root_path` and loads
    /// its index. Refuses to open over a corrupted index.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let root = config.root_path.clone();
        let chunks_dir = root.join(CHUNKS_DIR);
        fs::create_dir_all(&chunks_dir)?;

        let index_file = IndexFile::new(&root);
        let index = index_file.load()?;
        info!(
            root = %root.display(),
            assets = index.len(),
            chunk_size = config.chunk_size(),
            "opened chunk store"
        );

        Ok(Self {
            config,
            chunks_dir,
            index_file,
            writer: Mutex::new(()),
            index: RwLock::new(index),
        })
    }

    /// Store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.config.root_path
    }

    fn asset_dir(&self, asset_id: &str) -> PathBuf {
        self.chunks_dir.join(asset_id)
    }

    fn chunk_path(&self, id: &ChunkId) -> PathBuf {
        self.asset_dir(id.asset_id()).join(id.file_name())
    }

    fn fingerprint_path(&self, id: &ChunkId) -> PathBuf {
        self.asset_dir(id.asset_id()).join(id.fingerprint_file_name())
    }

    /// Splits `content` into fixed-size chunks, writes them, then records
    /// `asset` in the index with its chunk list and size filled in.
    ///
    /// The index is replaced only after every chunk is durable. On any
    /// failure (including cancellation) the index is unchanged and chunks
    /// written by this call are removed on a best-effort basis.
    pub fn create_asset(
        &self,
        mut asset: Asset,
        mut content: impl Read,
        cancel: &CancelToken,
    ) -> StoreResult<Asset> {
        validate_asset_id(&asset.id)?;
        let _guard = self.writer.lock();
        if self.index.read().contains_key(&asset.id) {
            return Err(StoreError::AssetExists { id: asset.id });
        }

        // No index entry, so anything already in the directory is an orphan.
        let dir = self.asset_dir(&asset.id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => debug!(asset_id = %asset.id, "discarded orphan chunks before create"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&dir)?;

        match self.write_content(&asset.id, &mut content, cancel) {
            Ok((chunks, size)) => {
                asset.chunks = chunks;
                asset.size = size;
            }
            Err(e) => {
                self.discard_dir(&asset.id, &dir);
                return Err(e);
            }
        }

        let mut next = self.index.read().clone();
        next.insert(asset.id.clone(), asset.clone());
        if let Err(e) = cancel.check().and_then(|()| self.index_file.persist(&next)) {
            self.discard_dir(&asset.id, &dir);
            return Err(e);
        }
        *self.index.write() = next;

        info!(
            asset_id = %asset.id,
            size = asset.size,
            chunks = asset.chunks.len(),
            "created asset"
        );
        Ok(asset)
    }

    fn write_content(
        &self,
        asset_id: &str,
        content: &mut impl Read,
        cancel: &CancelToken,
    ) -> StoreResult<(Vec<String>, u64)> {
        let mut buffer = vec![0u8; self.config.chunk_size()];
        let mut chunks = Vec::new();
        let mut size = 0u64;
        let mut position = 0u64;

        loop {
            cancel.check()?;
            let n = fill_chunk(content, &mut buffer)?;
            if n == 0 {
                break;
            }
            let chunk = Chunk::new(ChunkId::new(asset_id, position), buffer[..n].to_vec());
            self.store_chunk(&chunk)?;
            chunks.push(chunk.id.to_string());
            size += n as u64;
            position += 1;
            if n < buffer.len() {
                break;
            }
        }
        Ok((chunks, size))
    }

    fn discard_dir(&self, asset_id: &str, dir: &Path) {
        if let Err(e) = fs::remove_dir_all(dir) {
            if e.kind() != ErrorKind::NotFound {
                warn!(asset_id = %asset_id, error = %e, "failed to remove chunks of aborted write");
            }
        }
    }

    /// Writes one chunk. Rewriting identical bytes is a no-op; different
    /// bytes under an existing ID are a [`StoreError::ChunkConflict`].
    pub fn write_chunk(&self, chunk: &Chunk) -> StoreResult<()> {
        validate_asset_id(chunk.id.asset_id())?;
        chunk.verify()?;
        let _guard = self.writer.lock();
        fs::create_dir_all(self.asset_dir(chunk.id.asset_id()))?;
        self.store_chunk(chunk)
    }

    fn store_chunk(&self, chunk: &Chunk) -> StoreResult<()> {
        let path = self.chunk_path(&chunk.id);
        match fs::read(&path) {
            Ok(existing) => {
                let existing = Fingerprint::of(&existing);
                if existing == chunk.fingerprint {
                    let sidecar = self.fingerprint_path(&chunk.id);
                    if sidecar.exists() {
                        debug!(chunk_id = %chunk.id, "chunk already stored");
                    } else {
                        warn!(chunk_id = %chunk.id, "restoring missing chunk fingerprint");
                        write_atomic(&sidecar, chunk.fingerprint.to_hex().as_bytes())?;
                    }
                    return Ok(());
                }
                return Err(StoreError::ChunkConflict {
                    id: chunk.id.to_string(),
                    existing: existing.to_hex(),
                    incoming: chunk.fingerprint.to_hex(),
                });
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        write_atomic(&path, &chunk.data)?;
        write_atomic(
            &self.fingerprint_path(&chunk.id),
            chunk.fingerprint.to_hex().as_bytes(),
        )?;
        debug!(chunk_id = %chunk.id, size = chunk.size(), "stored chunk");
        Ok(())
    }

    /// Reads one chunk and verifies it against its stored fingerprint.
    pub fn read_chunk(&self, id: &str) -> StoreResult<Chunk> {
        let chunk_id = ChunkId::parse(id)?;
        let data = match fs::read(self.chunk_path(&chunk_id)) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::ChunkNotFound { id: id.to_string() })
            }
            Err(e) => return Err(e.into()),
        };

        let mut chunk = Chunk::new(chunk_id, data);
        match fs::read_to_string(self.fingerprint_path(&chunk.id)) {
            Ok(hex) => {
                chunk.fingerprint =
                    Fingerprint::from_hex(&hex).ok_or_else(|| StoreError::FingerprintMismatch {
                        id: id.to_string(),
                        expected: hex.trim().to_string(),
                        actual: chunk.fingerprint.to_hex(),
                    })?;
                chunk.verify()?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(chunk_id = %id, "chunk has no stored fingerprint");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(chunk)
    }

    /// The asset's content: its chunks concatenated in position order.
    pub fn read_asset_content(&self, id: &str, cancel: &CancelToken) -> StoreResult<Vec<u8>> {
        let asset = self.get_asset(id)?;
        let mut content = Vec::with_capacity(usize::try_from(asset.size).unwrap_or(0));
        for chunk_id in &asset.chunks {
            cancel.check()?;
            let chunk = self.read_chunk(chunk_id)?;
            content.extend_from_slice(&chunk.data);
        }
        Ok(content)
    }

    /// The indexed record for `id`.
    pub fn get_asset(&self, id: &str) -> StoreResult<Asset> {
        self.index
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::AssetNotFound { id: id.to_string() })
    }

    /// True if `id` is indexed.
    pub fn contains(&self, id: &str) -> bool {
        self.index.read().contains_key(id)
    }

    /// Replaces the descriptive fields of an indexed asset (name, kind,
    /// metadata, `updated_at`). The stored content layout (`chunks`, `size`,
    /// `created_at`) is kept.
    pub fn update_asset(&self, asset: Asset) -> StoreResult<Asset> {
        let _guard = self.writer.lock();
        let current = self.get_asset(&asset.id)?;
        let updated = Asset {
            chunks: current.chunks,
            size: current.size,
            created_at: current.created_at,
            ..asset
        };

        let mut next = self.index.read().clone();
        next.insert(updated.id.clone(), updated.clone());
        self.index_file.persist(&next)?;
        *self.index.write() = next;

        debug!(asset_id = %updated.id, "updated asset record");
        Ok(updated)
    }

    /// Removes an asset. The index entry goes first; chunk files are then
    /// deleted, and any that survive a failure are left to
    /// [`ChunkStore::sweep_orphans`].
    pub fn delete_asset(&self, id: &str) -> StoreResult<Asset> {
        let _guard = self.writer.lock();
        let removed = self.get_asset(id)?;

        let mut next = self.index.read().clone();
        next.remove(id);
        self.index_file.persist(&next)?;
        *self.index.write() = next;

        let dir = self.asset_dir(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(asset_id = %id, error = %e, "chunk removal failed, leaving orphans for sweep")
            }
        }
        info!(asset_id = %id, chunks = removed.chunks.len(), "deleted asset");
        Ok(removed)
    }

    /// Indexed assets matching `filter`, in ID order.
    pub fn list_assets(&self, filter: &AssetFilter) -> Vec<Asset> {
        self.index
            .read()
            .values()
            .filter(|asset| filter.matches(asset))
            .cloned()
            .collect()
    }

    /// Deletes every chunk directory with no index entry and returns the
    /// asset IDs that were removed.
    pub fn sweep_orphans(&self) -> StoreResult<Vec<String>> {
        let _guard = self.writer.lock();
        let index = self.index.read().clone();
        let mut removed = Vec::new();

        for entry in fs::read_dir(&self.chunks_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if index.contains_key(&name) {
                continue;
            }
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
            removed.push(name);
        }

        removed.sort();
        if !removed.is_empty() {
            info!(count = removed.len(), "swept orphan chunk directories");
        }
        Ok(removed)
    }

    /// Counts over the index.
    pub fn stats(&self) -> StoreStats {
        let index = self.index.read();
        StoreStats {
            assets: index.len(),
            chunks: index.values().map(|a| a.chunks.len()).sum(),
            bytes: index.values().map(|a| a.size).sum(),
        }
    }

    /// Timestamp of the most recent update across all assets.
    pub fn last_updated(&self) -> Option<Timestamp> {
        self.index.read().values().map(|a| a.updated_at).max()
    }
}
