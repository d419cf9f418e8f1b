//! Filters for listing assets.

use localhaven_types::{Asset, AssetKind, Metadata, MetadataValue};

/// Conjunction of optional criteria; an empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetFilter {
    /// Required kind.
    pub kind: Option<AssetKind>,
    /// Required name prefix.
    pub name_prefix: Option<String>,
    /// Metadata entries that must be present with equal values.
    pub metadata: Metadata,
}

impl AssetFilter {
    /// Matches every asset.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts to one kind.
    pub fn kind(mut self, kind: AssetKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Restricts to names starting with `prefix`.
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    /// Requires a metadata entry.
    pub fn metadata_eq(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// True if `asset` satisfies every criterion.
    pub fn matches(&self, asset: &Asset) -> bool {
        if let Some(kind) = &self.kind {
            if &asset.kind != kind {
                return false;
            }
        }
        if let Some(prefix) = &self.name_prefix {
            if !asset.name.starts_with(prefix.as_str()) {
                return false;
            }
        }
        self.metadata
            .iter()
            .all(|(k, v)| asset.metadata.get(k) == Some(v))
    }
}
