//! Error types for replica operations.

use thiserror::Error;

use localhaven_crdt::CrdtError;
use localhaven_store::StoreError;

/// Result type alias for replica operations.
pub type ReplicaResult<T> = Result<T, ReplicaError>;

/// Errors surfaced by a [`crate::Replica`].
#[derive(Debug, Error)]
pub enum ReplicaError {
    /// The reconciliation engine rejected an operation or lookup.
    #[error("reconciliation error: {0}")]
    Crdt(#[from] CrdtError),

    /// The chunk store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Reading or writing the operation log failed.
    #[error("operation log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation log holds a record that cannot be decoded.
    #[error("operation log {path} is corrupted: {reason}")]
    JournalCorrupted {
        /// Path of the log file.
        path: String,
        /// What was wrong.
        reason: String,
    },
}

impl ReplicaError {
    /// True if the error means the key or asset does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ReplicaError::Crdt(CrdtError::NotFound { .. })
                | ReplicaError::Store(StoreError::AssetNotFound { .. })
        )
    }
}
