//! Error types for the chunk store.

use thiserror::Error;

/// Result type alias for chunk store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error variants for chunk store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No index entry for the asset.
    #[error("Asset not found: {id}")]
    AssetNotFound {
        /// The asset ID that was looked up.
        id: String,
    },

    /// An index entry already exists for the asset.
    #[error("Asset already exists: {id}")]
    AssetExists {
        /// The conflicting asset ID.
        id: String,
    },

    /// The asset ID cannot be used as a directory name.
    #[error("Invalid asset id {id:?}: {reason}")]
    InvalidAssetId {
        /// The rejected ID.
        id: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The chunk ID is not of the form `<asset_id>-<position>`.
    #[error("Invalid chunk id: {id}")]
    InvalidChunkId {
        /// The rejected ID.
        id: String,
    },

    /// The chunk file does not exist.
    #[error("Chunk not found: {id}")]
    ChunkNotFound {
        /// The chunk ID that was looked up.
        id: String,
    },

    /// A chunk with this ID already exists with different bytes.
    #[error("Chunk conflict on {id}: stored fingerprint {existing}, new fingerprint {incoming}")]
    ChunkConflict {
        /// The chunk ID.
        id: String,
        /// Fingerprint of the stored bytes.
        existing: String,
        /// Fingerprint of the rejected bytes.
        incoming: String,
    },

    /// Chunk bytes do not match the expected fingerprint.
    #[error("Fingerprint mismatch on {id}: expected {expected}, actual {actual}")]
    FingerprintMismatch {
        /// The chunk ID.
        id: String,
        /// Fingerprint the caller expected.
        expected: String,
        /// Fingerprint of the bytes read.
        actual: String,
    },

    /// The operation was cancelled before the index was replaced.
    #[error("Operation cancelled: {reason}")]
    Cancelled {
        /// Cancellation cause (flag or deadline).
        reason: &'static str,
    },

    /// The index could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The on-disk index is unreadable; the store refuses to open.
    #[error("Index corrupted at {path}: {reason}")]
    IndexCorrupted {
        /// Index file path.
        path: String,
        /// Decoder message.
        reason: String,
    },

    /// The store configuration is unusable.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the problem.
        reason: String,
    },
}
