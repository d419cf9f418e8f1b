//! Operation log entries.
//!
//! An operation is an immutable record of one mutation. It carries the
//! author's version vector at creation time (including the author's own
//! increment), so its position in the causal order is self-describing.

use localhaven_types::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::CrdtResult;
use crate::vector::{NodeId, VersionVector};

/// Globally unique operation identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Generates a fresh random ID.
    pub fn generate() -> Self {
        OperationId(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        OperationId(id)
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mutation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    /// Create (or resurrect) a key.
    Insert,
    /// Field-level change to a key.
    Update,
    /// Remove a key, leaving a tombstone.
    Delete,
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpType::Insert => f.write_str("insert"),
            OpType::Update => f.write_str("update"),
            OpType::Delete => f.write_str("delete"),
        }
    }
}

/// One replicated mutation, as shipped by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique ID.
    pub id: OperationId,
    /// Originating replica.
    pub node_id: NodeId,
    /// Advisory wall-clock time, only used as a tie-break.
    pub timestamp: Timestamp,
    /// Causal snapshot, including the author's own increment.
    pub vector: VersionVector,
    /// Mutation kind.
    pub op_type: OpType,
    /// Serialized payload; see [`crate::payload::OpPayload`].
    pub payload: Vec<u8>,
}

impl Operation {
    /// Creates an operation with a fresh ID.
    pub fn new(
        node_id: NodeId,
        timestamp: Timestamp,
        vector: VersionVector,
        op_type: OpType,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id: OperationId::generate(),
            node_id,
            timestamp,
            vector,
            op_type,
            payload,
        }
    }

    /// The author's own counter in this operation's vector.
    pub fn counter(&self) -> u64 {
        self.vector.get(&self.node_id)
    }

    /// Encodes the operation for a transport.
    pub fn encode(&self) -> CrdtResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decodes an operation received from a transport.
    pub fn decode(bytes: &[u8]) -> CrdtResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
