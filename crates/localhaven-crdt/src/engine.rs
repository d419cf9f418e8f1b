//! Reconciliation engine: one replica's causally consistent state machine.
//!
//! Operations are admitted in causal order. A duplicate (already reflected in
//! the local vector) is ignored, an operation with missing dependencies is
//! buffered, and a deliverable one is applied in a single critical section,
//! after which buffered operations are re-driven.

use localhaven_types::{Asset, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, warn};

use crate::conflict::{ConflictLog, ConflictRecord};
use crate::document::{KeyState, Stamp};
use crate::error::{CrdtError, CrdtResult};
use crate::operation::{Operation, OperationId};
use crate::payload::OpPayload;
use crate::pending::{PendingBuffer, PendingOp};
use crate::vector::{Dependency, NodeId, VersionVector};

/// Default limit on buffered out-of-order operations.
pub const DEFAULT_MAX_PENDING: usize = 10_000;
/// Default number of conflict records retained.
pub const DEFAULT_CONFLICT_LOG_CAPACITY: usize = 1_000;

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of buffered operations; further out-of-order
    /// operations are rejected.
    pub max_pending: usize,
    /// Number of conflict records kept in memory.
    pub conflict_log_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_pending: DEFAULT_MAX_PENDING,
            conflict_log_capacity: DEFAULT_CONFLICT_LOG_CAPACITY,
        }
    }
}

/// What happened to a submitted operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Already reflected in the local vector; nothing changed.
    Duplicate,
    /// Held until `waiting_on` is applied.
    Buffered {
        /// First missing dependency.
        waiting_on: Dependency,
    },
    /// Committed; the local vector now covers it.
    Applied,
}

/// Visible effect of applied operations on one key.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyChange {
    /// The key is present with this value.
    Upserted(Asset),
    /// The key went from present to tombstoned.
    Removed {
        /// Affected key.
        key: String,
        /// Merged deletion vector.
        tombstone: VersionVector,
    },
}

impl KeyChange {
    /// Key this change refers to.
    pub fn key(&self) -> &str {
        match self {
            KeyChange::Upserted(asset) => &asset.id,
            KeyChange::Removed { key, .. } => key,
        }
    }
}

/// Result of [`ReconciliationEngine::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReport {
    /// Outcome for the submitted operation.
    pub outcome: ApplyOutcome,
    /// Operations committed by this call, the submitted one first and then
    /// any released from the pending buffer, in commit order.
    pub applied: Vec<OperationId>,
    /// Visible key changes caused by this call, in commit order.
    pub changes: Vec<KeyChange>,
}

impl ApplyReport {
    fn new(outcome: ApplyOutcome) -> Self {
        Self {
            outcome,
            applied: Vec::new(),
            changes: Vec::new(),
        }
    }
}

/// Engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Operations committed (directly or from the buffer).
    pub applied: u64,
    /// Operations committed after being released from the buffer.
    pub cascaded: u64,
    /// Duplicate deliveries ignored.
    pub duplicates: u64,
    /// Operations parked in the buffer (counted once per arrival).
    pub buffered: u64,
    /// Operations rejected (invalid payload or buffer overflow).
    pub rejected: u64,
    /// Concurrent writes resolved by the tie-break chain.
    pub conflicts: u64,
    /// Operations currently waiting in the buffer.
    pub pending: u64,
}

struct ReplicaState {
    vector: VersionVector,
    keys: HashMap<String, KeyState>,
    data: BTreeMap<String, Asset>,
    tombstones: BTreeMap<String, VersionVector>,
    log: Vec<Operation>,
    pending: PendingBuffer,
    conflicts: ConflictLog,
    stats: EngineStats,
}

/// Per-replica reconciliation engine.
///
/// All mutations run under one exclusive lock; reads share it and always
/// observe a fully applied state.
pub struct ReconciliationEngine {
    node_id: NodeId,
    config: EngineConfig,
    state: RwLock<ReplicaState>,
}

impl ReconciliationEngine {
    /// Creates an engine for replica `node_id` with an empty state.
    pub fn new(node_id: NodeId, config: EngineConfig) -> Self {
        let conflicts = ConflictLog::new(config.conflict_log_capacity);
        Self {
            node_id,
            config,
            state: RwLock::new(ReplicaState {
                vector: VersionVector::new(),
                keys: HashMap::new(),
                data: BTreeMap::new(),
                tombstones: BTreeMap::new(),
                log: Vec::new(),
                pending: PendingBuffer::new(),
                conflicts,
                stats: EngineStats::default(),
            }),
        }
    }

    /// This replica's node ID.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Submits an operation from a local write or remote delivery.
    ///
    /// Returns an error only for operations that can never be applied
    /// (undecodable payload, no author counter) or when the pending buffer
    /// is full; in both cases the state is unchanged.
    pub fn apply(&self, op: Operation) -> CrdtResult<ApplyReport> {
        let mut state = self.state.write();
        self.admit(&mut state, op)
    }

    /// Stamps a local mutation with the next local counter and the current
    /// time, then applies it. The returned operation is what the transport
    /// should ship to other replicas.
    pub fn commit_local(&self, payload: OpPayload) -> CrdtResult<(Operation, ApplyReport)> {
        let bytes = payload.encode()?;
        let mut state = self.state.write();
        let vector = state.vector.increment(&self.node_id);
        let op = Operation::new(
            self.node_id.clone(),
            Timestamp::now(),
            vector,
            payload.op_type(),
            bytes,
        );
        let report = self.admit(&mut state, op.clone())?;
        Ok((op, report))
    }

    fn admit(&self, state: &mut ReplicaState, op: Operation) -> CrdtResult<ApplyReport> {
        let counter = op.counter();
        if counter == 0 {
            state.stats.rejected += 1;
            warn!(op_id = %op.id, node = %op.node_id, "operation vector has no entry for its author");
            return Err(CrdtError::InvalidPayload {
                reason: format!("vector {} has no entry for author {}", op.vector, op.node_id),
            });
        }

        if counter <= state.vector.get(&op.node_id) {
            state.stats.duplicates += 1;
            debug!(op_id = %op.id, node = %op.node_id, counter, "duplicate operation ignored");
            return Ok(ApplyReport::new(ApplyOutcome::Duplicate));
        }

        if let Some(waiting_on) = state.pending.dependency_of(&op.id) {
            return Ok(ApplyReport::new(ApplyOutcome::Buffered { waiting_on }));
        }

        let payload = match OpPayload::decode(op.op_type, &op.payload) {
            Ok(payload) => payload,
            Err(e) => {
                state.stats.rejected += 1;
                warn!(op_id = %op.id, node = %op.node_id, error = %e, "rejected undecodable payload");
                return Err(e);
            }
        };

        if let Some(dep) = state.vector.missing_dependency(&op.vector, &op.node_id) {
            if state.pending.len() >= self.config.max_pending {
                state.stats.rejected += 1;
                warn!(
                    op_id = %op.id,
                    capacity = self.config.max_pending,
                    "pending buffer full, rejecting out-of-order operation"
                );
                return Err(CrdtError::PendingOverflow {
                    capacity: self.config.max_pending,
                    op_id: op.id,
                });
            }
            warn!(
                op_id = %op.id,
                node = %op.node_id,
                waiting_on = %dep.node,
                needed = dep.counter,
                "operation buffered on missing dependency"
            );
            state.stats.buffered += 1;
            state.pending.park(dep.clone(), PendingOp { op, payload });
            state.stats.pending = state.pending.len() as u64;
            return Ok(ApplyReport::new(ApplyOutcome::Buffered { waiting_on: dep }));
        }

        let mut report = ApplyReport::new(ApplyOutcome::Applied);
        let satisfied = (op.node_id.clone(), counter);
        self.commit(state, op, payload, &mut report);
        self.redrive(state, satisfied, &mut report);
        state.stats.pending = state.pending.len() as u64;
        Ok(report)
    }

    /// Releases buffered operations whose dependency was just satisfied,
    /// transitively.
    fn redrive(&self, state: &mut ReplicaState, first: (NodeId, u64), report: &mut ApplyReport) {
        let mut satisfied = VecDeque::from([first]);

        while let Some((node, counter)) = satisfied.pop_front() {
            for entry in state.pending.release(&node, counter) {
                let PendingOp { op, payload } = entry;
                if op.counter() <= state.vector.get(&op.node_id) {
                    state.stats.duplicates += 1;
                    continue;
                }
                if let Some(dep) = state.vector.missing_dependency(&op.vector, &op.node_id) {
                    state.pending.park(dep, PendingOp { op, payload });
                    continue;
                }
                let next = (op.node_id.clone(), op.counter());
                debug!(op_id = %op.id, node = %op.node_id, "releasing buffered operation");
                state.stats.cascaded += 1;
                self.commit(state, op, payload, report);
                satisfied.push_back(next);
            }
        }
    }

    fn commit(
        &self,
        state: &mut ReplicaState,
        op: Operation,
        payload: OpPayload,
        report: &mut ApplyReport,
    ) {
        let key = payload.key().to_string();
        let stamp = Stamp::of(&op);
        let was_present = state.data.contains_key(&key);
        let entry = state.keys.entry(key.clone()).or_default();

        let contests = match &payload {
            OpPayload::Insert(asset) => entry.apply_insert(&stamp, asset),
            OpPayload::Update(patch) => {
                if !was_present && !state.tombstones.contains_key(&key) {
                    debug!(key = %key, op_id = %op.id, "update on absent key applied as upsert");
                }
                entry.apply_update(&stamp, patch)
            }
            OpPayload::Delete(_) => entry.apply_delete(&stamp),
        };
        let visible = entry.materialize(&key);
        let deletion = entry.deletion_vector();

        for contest in &contests {
            let record = state.conflicts.record(&key, contest);
            state.stats.conflicts += 1;
            warn!(
                key = %key,
                field = ?record.field,
                winner = %record.winner_node,
                loser = %record.loser_node,
                decided_by = ?record.decided_by,
                "concurrent write resolved"
            );
        }

        match visible {
            Some(asset) => {
                state.tombstones.remove(&key);
                if state.data.get(&key) != Some(&asset) {
                    state.data.insert(key.clone(), asset.clone());
                    report.changes.push(KeyChange::Upserted(asset));
                }
            }
            None => {
                state.data.remove(&key);
                if let Some(tombstone) = deletion {
                    state.tombstones.insert(key.clone(), tombstone.clone());
                    if was_present {
                        report.changes.push(KeyChange::Removed {
                            key: key.clone(),
                            tombstone,
                        });
                    }
                }
            }
        }

        debug!(
            key = %key,
            op_id = %op.id,
            node = %op.node_id,
            op_type = %op.op_type,
            vector = %op.vector,
            "applied operation"
        );
        state.vector.merge_from(&op.vector);
        state.stats.applied += 1;
        report.applied.push(op.id);
        state.log.push(op);
    }

    /// Current value of `key`.
    pub fn query(&self, key: &str) -> CrdtResult<Asset> {
        self.state
            .read()
            .data
            .get(key)
            .cloned()
            .ok_or_else(|| CrdtError::NotFound {
                key: key.to_string(),
            })
    }

    /// Read-only copy of the replica's vector, for anti-entropy.
    pub fn snapshot_vector(&self) -> VersionVector {
        self.state.read().vector.clone()
    }

    /// Deletion vector of a tombstoned key.
    pub fn tombstone(&self, key: &str) -> Option<VersionVector> {
        self.state.read().tombstones.get(key).cloned()
    }

    /// Copy of every present key and its value.
    pub fn data(&self) -> BTreeMap<String, Asset> {
        self.state.read().data.clone()
    }

    /// Copy of every tombstoned key and its deletion vector.
    pub fn tombstones(&self) -> BTreeMap<String, VersionVector> {
        self.state.read().tombstones.clone()
    }

    /// Present keys in order.
    pub fn keys(&self) -> Vec<String> {
        self.state.read().data.keys().cloned().collect()
    }

    /// Applied operations a peer with vector `peer` has not seen, in commit
    /// order (which respects causality).
    pub fn operations_since(&self, peer: &VersionVector) -> Vec<Operation> {
        self.state
            .read()
            .log
            .iter()
            .filter(|op| op.counter() > peer.get(&op.node_id))
            .cloned()
            .collect()
    }

    /// Number of operations committed so far; the position the next commit
    /// takes in the applied log.
    pub fn log_len(&self) -> usize {
        self.state.read().log.len()
    }

    /// Applied operations from log position `position` onward, in commit
    /// order.
    pub fn operations_from(&self, position: usize) -> Vec<Operation> {
        self.state
            .read()
            .log
            .get(position..)
            .map(<[Operation]>::to_vec)
            .unwrap_or_default()
    }

    /// Number of buffered operations.
    pub fn pending_count(&self) -> usize {
        self.state.read().pending.len()
    }

    /// Dependencies blocking buffered operations, with how many wait on each.
    pub fn pending_dependencies(&self) -> Vec<(Dependency, usize)> {
        self.state.read().pending.dependencies()
    }

    /// Snapshot of the engine counters.
    pub fn stats(&self) -> EngineStats {
        self.state.read().stats.clone()
    }

    /// Retained conflict records, oldest first.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.state.read().conflicts.records().to_vec()
    }

    /// Retained conflict records for one key.
    pub fn conflicts_for_key(&self, key: &str) -> Vec<ConflictRecord> {
        self.state.read().conflicts.for_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OpType;
    use crate::payload::AssetPatch;
    use localhaven_types::{AssetKind, MetadataValue};
    use proptest::prelude::*;

    fn engine(node: &str) -> ReconciliationEngine {
        ReconciliationEngine::new(NodeId::from(node), EngineConfig::default())
    }

    fn vv(pairs: &[(&str, u64)]) -> VersionVector {
        VersionVector::from_pairs(pairs.iter().map(|(n, c)| (*n, *c)))
    }

    fn op(node: &str, secs: u64, pairs: &[(&str, u64)], payload: OpPayload) -> Operation {
        Operation::new(
            NodeId::from(node),
            Timestamp::new(secs, 0),
            vv(pairs),
            payload.op_type(),
            payload.encode().unwrap(),
        )
    }

    fn doc(key: &str, title: &str) -> Asset {
        let mut asset = Asset::new(key, key, AssetKind::Document).with_metadata("title", title);
        asset.created_at = Timestamp::new(1, 0);
        asset.updated_at = Timestamp::new(1, 0);
        asset
    }

    fn insert(node: &str, secs: u64, pairs: &[(&str, u64)], key: &str, title: &str) -> Operation {
        op(node, secs, pairs, OpPayload::Insert(doc(key, title)))
    }

    fn update(node: &str, secs: u64, pairs: &[(&str, u64)], key: &str, title: &str) -> Operation {
        op(
            node,
            secs,
            pairs,
            OpPayload::Update(AssetPatch::new(key).set_meta("title", title)),
        )
    }

    fn delete(node: &str, secs: u64, pairs: &[(&str, u64)], key: &str) -> Operation {
        op(node, secs, pairs, OpPayload::Delete(key.to_string()))
    }

    fn title(engine: &ReconciliationEngine, key: &str) -> Option<MetadataValue> {
        engine
            .query(key)
            .ok()
            .and_then(|a| a.metadata.get("title").cloned())
    }

    #[test]
    fn test_apply_insert_then_query() {
        let e = engine("n1");
        let report = e.apply(insert("n1", 1, &[("n1", 1)], "doc1", "hello")).unwrap();
        assert_eq!(report.outcome, ApplyOutcome::Applied);
        assert_eq!(report.changes.len(), 1);
        assert_eq!(title(&e, "doc1"), Some("hello".into()));
        assert_eq!(e.snapshot_vector(), vv(&[("n1", 1)]));
    }

    #[test]
    fn test_query_missing_key_is_not_found() {
        let e = engine("n1");
        assert!(matches!(e.query("nope"), Err(CrdtError::NotFound { .. })));
    }

    #[test]
    fn test_duplicate_is_noop() {
        let e = engine("n1");
        let ins = insert("n1", 1, &[("n1", 1)], "doc1", "hello");
        e.apply(ins.clone()).unwrap();
        let before = (e.data(), e.tombstones(), e.snapshot_vector());

        let report = e.apply(ins).unwrap();
        assert_eq!(report.outcome, ApplyOutcome::Duplicate);
        assert!(report.changes.is_empty());
        assert_eq!((e.data(), e.tombstones(), e.snapshot_vector()), before);
        assert_eq!(e.stats().duplicates, 1);
    }

    #[test]
    fn test_scenario_dominating_update_wins() {
        let ins = insert("n1", 10, &[("n1", 1)], "doc1", "draft");
        let upd = update("n2", 5, &[("n1", 1), ("n2", 1)], "doc1", "final");

        for order in [vec![ins.clone(), upd.clone()], vec![upd.clone(), ins.clone()]] {
            let e = engine("n3");
            for o in order {
                e.apply(o).unwrap();
            }
            assert_eq!(title(&e, "doc1"), Some("final".into()));
            assert_eq!(e.snapshot_vector(), vv(&[("n1", 1), ("n2", 1)]));
        }
    }

    #[test]
    fn test_update_before_insert_is_buffered_until_cause_arrives() {
        let e = engine("n3");
        let ins = insert("n1", 1, &[("n1", 1)], "doc1", "draft");
        let upd = update("n2", 2, &[("n1", 1), ("n2", 1)], "doc1", "final");

        let report = e.apply(upd.clone()).unwrap();
        assert_eq!(
            report.outcome,
            ApplyOutcome::Buffered {
                waiting_on: Dependency {
                    node: "n1".into(),
                    counter: 1
                }
            }
        );
        assert!(e.query("doc1").is_err());
        assert_eq!(e.pending_count(), 1);

        let report = e.apply(ins.clone()).unwrap();
        assert_eq!(report.outcome, ApplyOutcome::Applied);
        assert_eq!(report.applied, vec![ins.id, upd.id]);
        assert_eq!(title(&e, "doc1"), Some("final".into()));
        assert_eq!(e.pending_count(), 0);
        assert_eq!(e.stats().cascaded, 1);
    }

    #[test]
    fn test_buffering_same_operation_twice() {
        let e = engine("n3");
        let upd = update("n2", 2, &[("n1", 1), ("n2", 1)], "doc1", "final");
        e.apply(upd.clone()).unwrap();
        let report = e.apply(upd).unwrap();
        assert!(matches!(report.outcome, ApplyOutcome::Buffered { .. }));
        assert_eq!(e.pending_count(), 1);
        assert_eq!(e.stats().buffered, 1);
    }

    #[test]
    fn test_author_gap_is_buffered() {
        let e = engine("n2");
        let second = update("n1", 2, &[("n1", 2)], "doc1", "b");
        let third = update("n1", 3, &[("n1", 3)], "doc1", "c");
        assert!(matches!(
            e.apply(third.clone()).unwrap().outcome,
            ApplyOutcome::Buffered { .. }
        ));
        assert!(matches!(
            e.apply(second.clone()).unwrap().outcome,
            ApplyOutcome::Buffered { .. }
        ));
        assert_eq!(e.pending_count(), 2);
        assert_eq!(
            e.pending_dependencies(),
            vec![(
                Dependency {
                    node: "n1".into(),
                    counter: 1
                },
                2
            )]
        );

        let report = e.apply(insert("n1", 1, &[("n1", 1)], "doc1", "a")).unwrap();
        assert_eq!(report.applied.len(), 3);
        assert_eq!(title(&e, "doc1"), Some("c".into()));
    }

    #[test]
    fn test_scenario_replayed_insert_after_delete() {
        let e = engine("n2");
        let ins = insert("n1", 1, &[("n1", 1)], "doc1", "x");
        e.apply(ins.clone()).unwrap();
        let report = e.apply(delete("n1", 2, &[("n1", 2)], "doc1")).unwrap();
        assert_eq!(
            report.changes,
            vec![KeyChange::Removed {
                key: "doc1".into(),
                tombstone: vv(&[("n1", 2)])
            }]
        );

        let replay = e.apply(ins).unwrap();
        assert_eq!(replay.outcome, ApplyOutcome::Duplicate);
        assert!(e.query("doc1").is_err());
        assert_eq!(e.tombstone("doc1"), Some(vv(&[("n1", 2)])));
    }

    #[test]
    fn test_causally_later_insert_resurrects() {
        let e = engine("n2");
        e.apply(insert("n1", 1, &[("n1", 1)], "doc1", "x")).unwrap();
        e.apply(delete("n1", 2, &[("n1", 2)], "doc1")).unwrap();
        let report = e
            .apply(insert("n2", 3, &[("n1", 2), ("n2", 1)], "doc1", "again"))
            .unwrap();
        assert!(matches!(report.changes[0], KeyChange::Upserted(_)));
        assert_eq!(title(&e, "doc1"), Some("again".into()));
        assert_eq!(e.tombstone("doc1"), None);
    }

    #[test]
    fn test_update_concurrent_with_delete_keeps_tombstone() {
        let ins = insert("n1", 1, &[("n1", 1)], "doc1", "draft");
        let del = delete("n1", 10, &[("n1", 2)], "doc1");
        let upd = update("n2", 50, &[("n1", 1), ("n2", 1)], "doc1", "x");

        for order in [
            vec![ins.clone(), del.clone(), upd.clone()],
            vec![ins.clone(), upd.clone(), del.clone()],
        ] {
            let e = engine("n3");
            let mut changes = Vec::new();
            for o in order {
                changes.extend(e.apply(o).unwrap().changes);
            }
            assert!(matches!(e.query("doc1"), Err(CrdtError::NotFound { .. })));
            assert_eq!(e.tombstone("doc1"), Some(vv(&[("n1", 2)])));
            assert!(matches!(changes.last(), Some(KeyChange::Removed { .. })));
        }
    }

    #[test]
    fn test_update_on_absent_key_is_upsert() {
        let e = engine("n1");
        e.apply(update("n2", 4, &[("n2", 1)], "doc9", "orphan")).unwrap();
        let asset = e.query("doc9").unwrap();
        assert_eq!(asset.metadata.get("title"), Some(&"orphan".into()));
        assert_eq!(asset.kind, AssetKind::Binary);
    }

    #[test]
    fn test_invalid_payload_is_rejected_without_state_change() {
        let e = engine("n1");
        let mut bad = insert("n2", 1, &[("n2", 1)], "doc1", "x");
        bad.payload = b"not json".to_vec();
        assert!(e.apply(bad).is_err());
        assert!(e.snapshot_vector().is_empty());
        assert_eq!(e.stats().rejected, 1);
    }

    #[test]
    fn test_missing_author_entry_is_rejected() {
        let e = engine("n1");
        let bad = insert("n2", 1, &[("n1", 1)], "doc1", "x");
        assert!(matches!(e.apply(bad), Err(CrdtError::InvalidPayload { .. })));
    }

    #[test]
    fn test_pending_overflow() {
        let e = ReconciliationEngine::new(
            NodeId::from("n1"),
            EngineConfig {
                max_pending: 1,
                ..Default::default()
            },
        );
        e.apply(update("n2", 1, &[("n2", 2)], "a", "x")).unwrap();
        let err = e.apply(update("n3", 1, &[("n3", 2)], "a", "y")).unwrap_err();
        assert!(matches!(err, CrdtError::PendingOverflow { capacity: 1, .. }));
        assert_eq!(e.pending_count(), 1);
    }

    #[test]
    fn test_commit_local_increments_own_counter() {
        let e = engine("n1");
        let (first, _) = e
            .commit_local(OpPayload::Insert(doc("doc1", "a")))
            .unwrap();
        let (second, _) = e
            .commit_local(OpPayload::Update(AssetPatch::new("doc1").set_meta("title", "b")))
            .unwrap();
        assert_eq!(first.vector, vv(&[("n1", 1)]));
        assert_eq!(second.vector, vv(&[("n1", 2)]));
        assert_eq!(second.op_type, OpType::Update);
        assert_eq!(title(&e, "doc1"), Some("b".into()));
    }

    #[test]
    fn test_operations_since_returns_unseen_in_order() {
        let e = engine("n1");
        let (a, _) = e.commit_local(OpPayload::Insert(doc("a", "1"))).unwrap();
        let (b, _) = e.commit_local(OpPayload::Insert(doc("b", "2"))).unwrap();
        e.apply(insert("n2", 1, &[("n2", 1)], "c", "3")).unwrap();

        let since = e.operations_since(&vv(&[("n1", 1)]));
        assert_eq!(since.len(), 2);
        assert_eq!(since[0].id, b.id);
        assert!(e.operations_since(&e.snapshot_vector()).is_empty());
        assert_eq!(e.operations_since(&VersionVector::new())[0].id, a.id);
    }

    #[test]
    fn test_operations_from_position() {
        let e = engine("n1");
        let (a, _) = e.commit_local(OpPayload::Insert(doc("a", "1"))).unwrap();
        let (b, _) = e.commit_local(OpPayload::Insert(doc("b", "2"))).unwrap();
        assert_eq!(e.log_len(), 2);
        assert_eq!(e.operations_from(0), vec![a, b.clone()]);
        assert_eq!(e.operations_from(1), vec![b]);
        assert!(e.operations_from(2).is_empty());
        assert!(e.operations_from(9).is_empty());
    }

    #[test]
    fn test_concurrent_updates_logged_as_conflict() {
        let e = engine("n3");
        e.apply(insert("n1", 1, &[("n1", 1)], "doc1", "base")).unwrap();
        e.apply(update("n1", 5, &[("n1", 2)], "doc1", "from-n1")).unwrap();
        e.apply(update("n2", 9, &[("n1", 1), ("n2", 1)], "doc1", "from-n2"))
            .unwrap();
        assert_eq!(title(&e, "doc1"), Some("from-n2".into()));
        let conflicts = e.conflicts_for_key("doc1");
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].winner_node, NodeId::from("n2"));
        assert_eq!(e.stats().conflicts, 1);
    }

    /// Three replicas' worth of causally related operations touching two keys.
    fn history() -> Vec<Operation> {
        vec![
            insert("n1", 10, &[("n1", 1)], "doc1", "a"),
            insert("n2", 11, &[("n2", 1)], "doc2", "b"),
            update("n2", 12, &[("n1", 1), ("n2", 2)], "doc1", "n2-edit"),
            update("n1", 13, &[("n1", 2)], "doc1", "n1-edit"),
            delete("n3", 9, &[("n1", 1), ("n2", 1), ("n3", 1)], "doc2"),
            update("n1", 8, &[("n1", 3), ("n2", 1)], "doc2", "n1-doc2"),
            delete("n3", 20, &[("n1", 2), ("n2", 2), ("n3", 2)], "doc1"),
            insert("n2", 21, &[("n1", 2), ("n2", 3), ("n3", 2)], "doc1", "reborn"),
        ]
    }

    proptest! {
        #[test]
        fn prop_delivery_order_does_not_matter(
            perm in Just((0..8usize).collect::<Vec<_>>()).prop_shuffle(),
            dup in 0..8usize,
        ) {
            let ops = history();

            let reference = engine("r0");
            for o in &ops {
                reference.apply(o.clone()).unwrap();
            }

            let e = engine("r1");
            for i in &perm {
                e.apply(ops[*i].clone()).unwrap();
            }
            e.apply(ops[dup].clone()).unwrap();

            prop_assert_eq!(e.pending_count(), 0);
            prop_assert_eq!(e.data(), reference.data());
            prop_assert_eq!(e.tombstones(), reference.tombstones());
            prop_assert_eq!(e.snapshot_vector(), reference.snapshot_vector());
        }
    }
}
