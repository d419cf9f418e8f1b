//! Chunks and their positional identifiers.
//!
//! A chunk ID is `<asset_id>-<position>`. Asset IDs may themselves contain
//! `-`, so parsing splits at the last one.

use std::fmt;

use crate::error::{StoreError, StoreResult};
use crate::fingerprint::Fingerprint;

/// Checks that an asset ID is usable as a directory name.
pub fn validate_asset_id(id: &str) -> StoreResult<()> {
    let reason = if id.is_empty() {
        Some("empty")
    } else if id == "." || id == ".." {
        Some("reserved path component")
    } else if id.contains(['/', '\\']) {
        Some("contains a path separator")
    } else if id.contains('\0') {
        Some("contains NUL")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(StoreError::InvalidAssetId {
            id: id.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Identifier of one chunk of one asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId {
    asset_id: String,
    position: u64,
}

impl ChunkId {
    /// ID of the chunk at `position` of `asset_id`.
    pub fn new(asset_id: impl Into<String>, position: u64) -> Self {
        Self {
            asset_id: asset_id.into(),
            position,
        }
    }

    /// Parses `<asset_id>-<position>`.
    pub fn parse(id: &str) -> StoreResult<Self> {
        let invalid = || StoreError::InvalidChunkId { id: id.to_string() };
        let (asset_id, position) = id.rsplit_once('-').ok_or_else(invalid)?;
        if position.is_empty() || !position.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let position = position.parse::<u64>().map_err(|_| invalid())?;
        validate_asset_id(asset_id).map_err(|_| invalid())?;
        Ok(Self::new(asset_id, position))
    }

    /// Owning asset.
    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    /// Zero-based position within the asset.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// File name under the asset's chunk directory.
    pub fn file_name(&self) -> String {
        format!("{}.chunk", self.position)
    }

    /// File name of the fingerprint sidecar.
    pub fn fingerprint_file_name(&self) -> String {
        format!("{}.blake3", self.position)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.asset_id, self.position)
    }
}

/// An immutable piece of asset content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Positional ID.
    pub id: ChunkId,
    /// Raw bytes.
    pub data: Vec<u8>,
    /// Fingerprint of `data`.
    pub fingerprint: Fingerprint,
}

impl Chunk {
    /// Builds a chunk and fingerprints its bytes.
    pub fn new(id: ChunkId, data: Vec<u8>) -> Self {
        let fingerprint = Fingerprint::of(&data);
        Self {
            id,
            data,
            fingerprint,
        }
    }

    /// Byte length.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Position within the owning asset.
    pub fn position(&self) -> u64 {
        self.id.position()
    }

    /// Recomputes the fingerprint and compares it with the stored one.
    pub fn verify(&self) -> StoreResult<()> {
        let actual = Fingerprint::of(&self.data);
        if actual != self.fingerprint {
            return Err(StoreError::FingerprintMismatch {
                id: self.id.to_string(),
                expected: self.fingerprint.to_hex(),
                actual: actual.to_hex(),
            });
        }
        Ok(())
    }
}
