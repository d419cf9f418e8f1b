use localhaven_crdt::EngineConfig;
use localhaven_store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Full configuration of one replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Stable identifier of this replica.
    pub node_id: String,
    /// Chunk store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Reconciliation engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            node_id: String::from("node-1"),
            store: StoreConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl ReplicaConfig {
    /// Config for `node_id` storing under `root`, defaults elsewhere.
    pub fn new(node_id: impl Into<String>, root: impl AsRef<Path>) -> Self {
        Self {
            node_id: node_id.into(),
            store: StoreConfig::with_root(root.as_ref()),
            engine: EngineConfig::default(),
        }
    }

    /// Loads a `.json` or `.toml` config file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: ReplicaConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        if config.node_id.is_empty() {
            anyhow::bail!("node_id must not be empty");
        }
        config.store.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = ReplicaConfig::default();
        assert_eq!(config.node_id, "node-1");
        assert_eq!(config.store.root_path, PathBuf::from("./data"));
        assert_eq!(config.store.chunk_size_kb, 512);
        assert_eq!(config.engine.max_pending, 10_000);
        assert_eq!(config.engine.conflict_log_capacity, 1_000);
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(
            file,
            r#"{{
                "node_id": "laptop",
                "store": {{"root_path": "/srv/haven", "chunk_size_kb": 64}},
                "engine": {{"max_pending": 50}}
            }}"#
        )
        .unwrap();

        let config = ReplicaConfig::from_file(file.path()).unwrap();
        assert_eq!(config.node_id, "laptop");
        assert_eq!(config.store.root_path, PathBuf::from("/srv/haven"));
        assert_eq!(config.store.chunk_size_kb, 64);
        assert_eq!(config.store.cache_ttl_hours, 24);
        assert_eq!(config.engine.max_pending, 50);
        assert_eq!(config.engine.conflict_log_capacity, 1_000);
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
node_id = "desktop"

[store]
root_path = "/var/lib/haven"
max_storage_gb = 50
"#
        )
        .unwrap();

        let config = ReplicaConfig::from_file(file.path()).unwrap();
        assert_eq!(config.node_id, "desktop");
        assert_eq!(config.store.max_storage_gb, 50);
        assert_eq!(config.store.chunk_size_kb, 512);
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn test_from_file_rejects_unknown_extension() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "node_id: x").unwrap();
        assert!(ReplicaConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_from_file_rejects_zero_chunk_size() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(
            file,
            r#"{{"node_id": "n", "store": {{"chunk_size_kb": 0}}}}"#
        )
        .unwrap();
        assert!(ReplicaConfig::from_file(file.path()).is_err());
    }
}
