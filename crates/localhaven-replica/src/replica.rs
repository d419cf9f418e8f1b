//! A replica: one reconciliation engine driving one chunk store.
//!
//! Local writes go through the store first (content must be durable before
//! the insert is announced) and then through the engine, which stamps the
//! operation to ship. Remote operations go through the engine only; the
//! visible key changes they cause are then mirrored into the store's index.
//! Chunk content itself travels out of band.
//!
//! Every committed operation is appended to the operation log before the
//! call returns, and the log is replayed on open, so a reopened replica
//! resumes its own counter where it stopped.

use localhaven_crdt::{
    ApplyReport, AssetPatch, KeyChange, NodeId, OpPayload, Operation, ReconciliationEngine,
    VersionVector,
};
use localhaven_store::{AssetFilter, CancelToken, ChunkStore};
use localhaven_types::{Asset, Timestamp};
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ReplicaConfig;
use crate::error::ReplicaResult;
use crate::journal::OpJournal;

/// One replica of the asset collection.
pub struct Replica {
    engine: ReconciliationEngine,
    store: Arc<ChunkStore>,
    journal: OpJournal,
}

impl Replica {
    /// Opens the replica's store, replays its operation log into a fresh
    /// engine and brings the store index in line with the replayed state.
    pub fn open(config: ReplicaConfig) -> ReplicaResult<Self> {
        let store = ChunkStore::open(config.store)?;
        let node_id = NodeId::new(config.node_id);
        let (journal, recorded) = OpJournal::open(store.root())?;

        let engine = ReconciliationEngine::new(node_id, config.engine);
        let replayed = recorded.len();
        for op in recorded {
            engine.apply(op)?;
        }
        journal.resume_at(engine.log_len());

        let replica = Self {
            engine,
            store: Arc::new(store),
            journal,
        };
        replica.reconcile_store()?;
        info!(
            node = %replica.node_id(),
            replayed,
            vector = %replica.snapshot_vector(),
            "replica opened"
        );
        Ok(replica)
    }

    /// Applies the engine's view to the store index after a replay: drops
    /// tombstoned and never-announced assets and refreshes stale records.
    fn reconcile_store(&self) -> ReplicaResult<()> {
        let data = self.engine.data();
        let tombstones = self.engine.tombstones();
        for stored in self.store.list_assets(&AssetFilter::all()) {
            match data.get(&stored.id) {
                Some(asset) if *asset != stored => {
                    self.store.update_asset(asset.clone())?;
                }
                Some(_) => {}
                None => {
                    if !tombstones.contains_key(&stored.id) {
                        warn!(asset_id = %stored.id, "discarding stored asset that was never announced");
                    }
                    self.store.delete_asset(&stored.id)?;
                }
            }
        }
        Ok(())
    }

    /// This replica's node ID.
    pub fn node_id(&self) -> &NodeId {
        self.engine.node_id()
    }

    /// The reconciliation engine.
    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    /// Shared handle to the chunk store.
    pub fn store(&self) -> Arc<ChunkStore> {
        Arc::clone(&self.store)
    }

    /// Stores `content` in chunks and announces the asset with an Insert.
    /// Returns the operation to ship to other replicas.
    pub fn create_asset(
        &self,
        asset: Asset,
        content: impl Read,
        cancel: &CancelToken,
    ) -> ReplicaResult<Operation> {
        let stored = self.store.create_asset(asset, content, cancel)?;
        let id = stored.id.clone();
        let (op, report) = match self.engine.commit_local(OpPayload::Insert(stored)) {
            Ok(committed) => committed,
            Err(e) => {
                if let Err(cleanup) = self.store.delete_asset(&id) {
                    warn!(asset_id = %id, error = %cleanup, "failed to roll back stored asset");
                }
                return Err(e.into());
            }
        };
        self.journal.append_from(&self.engine)?;
        self.mirror(&report)?;
        info!(asset_id = %id, node = %self.node_id(), "created asset");
        Ok(op)
    }

    /// Applies a field-level change locally. `updated_at` defaults to now.
    pub fn update_asset(&self, patch: AssetPatch) -> ReplicaResult<Operation> {
        let patch = match patch.updated_at {
            Some(_) => patch,
            None => patch.touched_at(Timestamp::now()),
        };
        let key = patch.id.clone();
        let (op, report) = self.engine.commit_local(OpPayload::Update(patch))?;
        self.journal.append_from(&self.engine)?;
        self.mirror(&report)?;
        debug!(asset_id = %key, op_id = %op.id, "updated asset");
        Ok(op)
    }

    /// Deletes an asset locally, tombstoning its key.
    pub fn delete_asset(&self, id: &str) -> ReplicaResult<Operation> {
        let (op, report) = self.engine.commit_local(OpPayload::Delete(id.to_string()))?;
        self.journal.append_from(&self.engine)?;
        self.mirror(&report)?;
        info!(asset_id = %id, op_id = %op.id, "deleted asset");
        Ok(op)
    }

    /// Delivers an operation from another replica.
    pub fn receive(&self, op: Operation) -> ReplicaResult<ApplyReport> {
        let report = self.engine.apply(op)?;
        if !report.applied.is_empty() {
            self.journal.append_from(&self.engine)?;
        }
        self.mirror(&report)?;
        Ok(report)
    }

    /// Pulls every operation `peer` has applied that this replica lacks.
    /// Returns how many were newly applied.
    pub fn sync_from(&self, peer: &Replica) -> ReplicaResult<usize> {
        let mut applied = 0;
        for op in peer.operations_since(&self.snapshot_vector()) {
            applied += self.receive(op)?.applied.len();
        }
        Ok(applied)
    }

    fn mirror(&self, report: &ApplyReport) -> ReplicaResult<()> {
        for change in &report.changes {
            match change {
                KeyChange::Upserted(asset) => {
                    if !self.store.contains(&asset.id) {
                        debug!(asset_id = %asset.id, "content not held locally, index not updated");
                        continue;
                    }
                    if self.store.get_asset(&asset.id)? != *asset {
                        self.store.update_asset(asset.clone())?;
                    }
                }
                KeyChange::Removed { key, .. } => {
                    if self.store.contains(key) {
                        self.store.delete_asset(key)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Current merged value of `key`.
    pub fn query(&self, key: &str) -> ReplicaResult<Asset> {
        Ok(self.engine.query(key)?)
    }

    /// Locally stored content of an asset.
    pub fn read_content(&self, id: &str, cancel: &CancelToken) -> ReplicaResult<Vec<u8>> {
        Ok(self.store.read_asset_content(id, cancel)?)
    }

    /// This replica's version vector.
    pub fn snapshot_vector(&self) -> VersionVector {
        self.engine.snapshot_vector()
    }

    /// Operations a peer at `peer` has not yet seen.
    pub fn operations_since(&self, peer: &VersionVector) -> Vec<Operation> {
        self.engine.operations_since(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use localhaven_crdt::ApplyOutcome;
    use localhaven_types::{AssetKind, MetadataValue};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn replica(node: &str, dir: &TempDir) -> Replica {
        let mut config = ReplicaConfig::new(node, dir.path().join(node));
        config.store.chunk_size_kb = 1;
        Replica::open(config).unwrap()
    }

    #[test]
    fn test_create_then_query_and_read() {
        let dir = TempDir::new().unwrap();
        let r = replica("n1", &dir);
        let data = vec![7u8; 1500];
        let op = r
            .create_asset(
                Asset::new("doc1", "Doc", AssetKind::Document),
                Cursor::new(data.clone()),
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(op.counter(), 1);
        let asset = r.query("doc1").unwrap();
        assert_eq!(asset.chunks.len(), 2);
        assert_eq!(asset.size, 1500);
        assert_eq!(r.read_content("doc1", &CancelToken::new()).unwrap(), data);
    }

    #[test]
    fn test_update_mirrors_into_store() {
        let dir = TempDir::new().unwrap();
        let r = replica("n1", &dir);
        r.create_asset(
            Asset::new("doc1", "Doc", AssetKind::Document),
            Cursor::new(b"hi".to_vec()),
            &CancelToken::new(),
        )
        .unwrap();
        r.update_asset(AssetPatch::new("doc1").set_meta("title", "Report"))
            .unwrap();

        let stored = r.store().get_asset("doc1").unwrap();
        assert_eq!(
            stored.metadata.get("title"),
            Some(&MetadataValue::Text("Report".into()))
        );
        assert_eq!(stored.chunks, vec!["doc1-0".to_string()]);
        assert_eq!(r.query("doc1").unwrap().metadata, stored.metadata);
    }

    #[test]
    fn test_delete_removes_content() {
        let dir = TempDir::new().unwrap();
        let r = replica("n1", &dir);
        r.create_asset(
            Asset::new("doc1", "Doc", AssetKind::Document),
            Cursor::new(b"bytes".to_vec()),
            &CancelToken::new(),
        )
        .unwrap();
        r.delete_asset("doc1").unwrap();

        assert!(r.query("doc1").unwrap_err().is_not_found());
        assert!(!r.store().contains("doc1"));
        assert!(r.engine().tombstone("doc1").is_some());
    }

    #[test]
    fn test_remote_delete_releases_local_chunks() {
        let dir = TempDir::new().unwrap();
        let a = replica("a", &dir);
        let b = replica("b", &dir);
        a.create_asset(
            Asset::new("doc1", "Doc", AssetKind::Document),
            Cursor::new(b"shared".to_vec()),
            &CancelToken::new(),
        )
        .unwrap();
        b.sync_from(&a).unwrap();
        assert!(b.query("doc1").is_ok());
        assert!(!b.store().contains("doc1"));

        let del = b.delete_asset("doc1").unwrap();
        a.receive(del).unwrap();
        assert!(a.query("doc1").is_err());
        assert!(!a.store().contains("doc1"));
    }

    #[test]
    fn test_reopen_resumes_counter_and_state() {
        let dir = TempDir::new().unwrap();
        let peer = replica("n2", &dir);
        let first = {
            let r = replica("n1", &dir);
            let op = r
                .create_asset(
                    Asset::new("a", "a", AssetKind::Document),
                    Cursor::new(b"kept".to_vec()),
                    &CancelToken::new(),
                )
                .unwrap();
            peer.receive(op.clone()).unwrap();
            op
        };

        let r = replica("n1", &dir);
        assert_eq!(r.snapshot_vector(), first.vector);
        assert_eq!(r.query("a").unwrap().chunks, vec!["a-0".to_string()]);
        assert_eq!(r.read_content("a", &CancelToken::new()).unwrap(), b"kept");

        let next = r
            .create_asset(
                Asset::new("b", "b", AssetKind::Document),
                Cursor::new(Vec::new()),
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(next.counter(), 2);
        assert_eq!(peer.receive(next).unwrap().outcome, ApplyOutcome::Applied);
        assert!(peer.query("b").is_ok());
    }

    #[test]
    fn test_reopen_keeps_remote_operations_and_tombstones() {
        let dir = TempDir::new().unwrap();
        let a = replica("a", &dir);
        {
            let b = replica("b", &dir);
            b.create_asset(
                Asset::new("x", "x", AssetKind::Binary),
                Cursor::new(b"x".to_vec()),
                &CancelToken::new(),
            )
            .unwrap();
            a.sync_from(&b).unwrap();
            b.receive(a.delete_asset("x").unwrap()).unwrap();
            assert!(!b.store().contains("x"));
        }

        let b = replica("b", &dir);
        assert_eq!(b.snapshot_vector(), a.snapshot_vector());
        assert!(b.query("x").unwrap_err().is_not_found());
        assert!(b.engine().tombstone("x").is_some());
        assert_eq!(b.sync_from(&a).unwrap(), 0);
    }

    #[test]
    fn test_reopen_discards_unannounced_asset() {
        let dir = TempDir::new().unwrap();
        {
            let r = replica("n1", &dir);
            r.store()
                .create_asset(
                    Asset::new("ghost", "ghost", AssetKind::Binary),
                    Cursor::new(b"boo".to_vec()),
                    &CancelToken::new(),
                )
                .unwrap();
        }
        let r = replica("n1", &dir);
        assert!(!r.store().contains("ghost"));
        assert!(r.snapshot_vector().is_empty());
    }

    #[test]
    fn test_sync_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let a = replica("a", &dir);
        let b = replica("b", &dir);
        a.create_asset(
            Asset::new("x", "x", AssetKind::Binary),
            Cursor::new(Vec::new()),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(b.sync_from(&a).unwrap(), 1);
        assert_eq!(b.sync_from(&a).unwrap(), 0);
        assert_eq!(a.snapshot_vector(), b.snapshot_vector());
    }
}
