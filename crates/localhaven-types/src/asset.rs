//! Asset records: the replicated value and the persisted index entry.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::metadata::Metadata;
use crate::time::Timestamp;

/// Kind of content an asset holds.
///
/// Serialized as a plain lowercase string; unknown kinds round-trip through
/// `Other` unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AssetKind {
    /// Structured text content (articles, pages).
    Document,
    /// Still image.
    Image,
    /// Video stream.
    Video,
    /// Audio stream.
    Audio,
    /// Opaque binary blob.
    Binary,
    /// Any other kind, kept verbatim.
    Other(String),
}

impl AssetKind {
    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &str {
        match self {
            AssetKind::Document => "document",
            AssetKind::Image => "image",
            AssetKind::Video => "video",
            AssetKind::Audio => "audio",
            AssetKind::Binary => "binary",
            AssetKind::Other(s) => s,
        }
    }
}

impl From<String> for AssetKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "document" => AssetKind::Document,
            "image" => AssetKind::Image,
            "video" => AssetKind::Video,
            "audio" => AssetKind::Audio,
            "binary" => AssetKind::Binary,
            _ => AssetKind::Other(value),
        }
    }
}

impl From<AssetKind> for String {
    fn from(value: AssetKind) -> Self {
        match value {
            AssetKind::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl Default for AssetKind {
    fn default() -> Self {
        AssetKind::Binary
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored file or piece of content.
///
/// `chunks` lists chunk IDs in position order; concatenating those chunks
/// reproduces the asset's `size` bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Stable asset identifier, also the replicated key.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Content kind.
    #[serde(rename = "type")]
    pub kind: AssetKind,
    /// Content size in bytes.
    pub size: u64,
    /// Chunk IDs in position order.
    #[serde(default)]
    pub chunks: Vec<String>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last modification time.
    pub updated_at: Timestamp,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Asset {
    /// Creates an empty asset stamped with the current time.
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: AssetKind) -> Self {
        let now = Timestamp::now();
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            size: 0,
            chunks: Vec::new(),
            created_at: now,
            updated_at: now,
            metadata: Metadata::new(),
        }
    }

    /// Builder-style helper that sets one metadata entry.
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<crate::metadata::MetadataValue>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
