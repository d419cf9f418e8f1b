//! Typed asset metadata values.
//!
//! Metadata maps are free-form on the wire (plain JSON objects). Every value is
//! decoded into [`MetadataValue`], which serializes untagged so the external
//! JSON shape is preserved while merge code matches every variant exhaustively.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata map attached to an asset, ordered by key.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A single metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// JSON `null`.
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Signed integer. Tried before `Float` so whole numbers stay integral.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Ordered list of values.
    List(Vec<MetadataValue>),
    /// Nested map.
    Map(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    /// Returns the variant name, used in logs and filters.
    pub fn kind(&self) -> &'static str {
        match self {
            MetadataValue::Null => "null",
            MetadataValue::Bool(_) => "bool",
            MetadataValue::Integer(_) => "integer",
            MetadataValue::Float(_) => "float",
            MetadataValue::Text(_) => "text",
            MetadataValue::List(_) => "list",
            MetadataValue::Map(_) => "map",
        }
    }

    /// Returns the text if this is a `Text` value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Integer(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}
