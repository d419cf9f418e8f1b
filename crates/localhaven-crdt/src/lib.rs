#![warn(missing_docs)]

//! LocalHaven reconciliation subsystem: version vectors, causal delivery and
//! deterministic merge of replicated asset documents.

pub mod conflict;
pub mod document;
pub mod engine;
pub mod error;
pub mod operation;
pub mod payload;
pub mod pending;
pub mod vector;

pub use conflict::{ConflictLog, ConflictRecord};
pub use document::{Field, KeyState, Stamp, TieBreak};
pub use engine::{
    ApplyOutcome, ApplyReport, EngineConfig, EngineStats, KeyChange, ReconciliationEngine,
};
pub use error::{CrdtError, CrdtResult};
pub use operation::{OpType, Operation, OperationId};
pub use payload::{AssetPatch, OpPayload};
pub use vector::{Causality, Dependency, NodeId, VersionVector};
