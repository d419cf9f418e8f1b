//! Error types for the reconciliation subsystem.
//!
//! Duplicate and out-of-order deliveries are outcomes, not errors; see
//! [`crate::engine::ApplyOutcome`].

use thiserror::Error;

use crate::operation::OperationId;

/// Result type alias for reconciliation operations.
pub type CrdtResult<T> = Result<T, CrdtError>;

/// Errors that can occur in the reconciliation subsystem.
#[derive(Debug, Error)]
pub enum CrdtError {
    /// Payload could not be decoded as JSON for its operation type.
    #[error("payload decode error: {0}")]
    Payload(#[from] serde_json::Error),

    /// Payload decoded but is semantically invalid.
    #[error("invalid payload: {reason}")]
    InvalidPayload {
        /// Description of the problem.
        reason: String,
    },

    /// Operation envelope could not be encoded or decoded.
    #[error("operation codec error")]
    Codec(#[from] bincode::Error),

    /// The pending buffer is full; the out-of-order operation was not kept.
    #[error("pending buffer full ({capacity} operations), rejected {op_id}")]
    PendingOverflow {
        /// Configured buffer capacity.
        capacity: usize,
        /// The rejected operation.
        op_id: OperationId,
    },

    /// The requested key is absent or tombstoned.
    #[error("key not found: {key}")]
    NotFound {
        /// The key that was looked up.
        key: String,
    },
}
