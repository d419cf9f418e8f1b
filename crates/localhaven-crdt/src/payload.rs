//! Typed operation payloads.
//!
//! Payload bytes are JSON so the asset metadata keeps its external shape:
//! an Insert carries a whole [`Asset`], an Update an [`AssetPatch`], and a
//! Delete the bare key as a JSON string.

use localhaven_types::{Asset, AssetKind, MetadataValue, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{CrdtError, CrdtResult};
use crate::operation::OpType;

/// Partial asset change. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetPatch {
    /// Key of the asset being changed.
    pub id: String,
    /// New name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New kind.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<AssetKind>,
    /// New size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// New chunk list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<String>>,
    /// New modification time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    /// Metadata entries to set; `None` (JSON `null`) removes the entry.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Option<MetadataValue>>,
}

impl AssetPatch {
    /// Empty patch for `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Sets the name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets one metadata entry.
    pub fn set_meta(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), Some(value.into()));
        self
    }

    /// Removes one metadata entry.
    pub fn remove_meta(mut self, key: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), None);
        self
    }

    /// Sets the modification time.
    pub fn touched_at(mut self, at: Timestamp) -> Self {
        self.updated_at = Some(at);
        self
    }
}

/// Decoded payload of an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OpPayload {
    /// Full document for a key.
    Insert(Asset),
    /// Field-level change.
    Update(AssetPatch),
    /// Key to delete.
    Delete(String),
}

impl OpPayload {
    /// The key this payload touches.
    pub fn key(&self) -> &str {
        match self {
            OpPayload::Insert(asset) => &asset.id,
            OpPayload::Update(patch) => &patch.id,
            OpPayload::Delete(key) => key,
        }
    }

    /// The operation type that carries this payload.
    pub fn op_type(&self) -> OpType {
        match self {
            OpPayload::Insert(_) => OpType::Insert,
            OpPayload::Update(_) => OpType::Update,
            OpPayload::Delete(_) => OpType::Delete,
        }
    }

    /// Serializes the payload to operation bytes.
    pub fn encode(&self) -> CrdtResult<Vec<u8>> {
        let bytes = match self {
            OpPayload::Insert(asset) => serde_json::to_vec(asset)?,
            OpPayload::Update(patch) => serde_json::to_vec(patch)?,
            OpPayload::Delete(key) => serde_json::to_vec(key)?,
        };
        Ok(bytes)
    }

    /// Decodes operation bytes according to the operation type.
    pub fn decode(op_type: OpType, bytes: &[u8]) -> CrdtResult<Self> {
        let payload = match op_type {
            OpType::Insert => OpPayload::Insert(serde_json::from_slice(bytes)?),
            OpType::Update => OpPayload::Update(serde_json::from_slice(bytes)?),
            OpType::Delete => OpPayload::Delete(serde_json::from_slice(bytes)?),
        };
        if payload.key().is_empty() {
            return Err(CrdtError::InvalidPayload {
                reason: "empty key".to_string(),
            });
        }
        Ok(payload)
    }
}
