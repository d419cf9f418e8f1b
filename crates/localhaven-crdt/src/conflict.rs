//! Conflict log for concurrent writes resolved by the conflict chain.
//!
//! Resolution itself happens in [`crate::document`]; this module only keeps
//! an audit trail so operators can see which concurrent edits lost.

use localhaven_types::Timestamp;
use serde::{Deserialize, Serialize};

use crate::document::{Contest, TieBreak};
use crate::operation::OperationId;
use crate::vector::NodeId;

/// One resolved conflict between two concurrent operations on a key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Unique identifier for this conflict within the log.
    pub conflict_id: u64,
    /// Key both operations touched.
    pub key: String,
    /// Contested field (`None` when a delete met a write).
    pub field: Option<String>,
    /// Winning operation.
    pub winner_op: OperationId,
    /// Author of the winning operation.
    pub winner_node: NodeId,
    /// Losing operation.
    pub loser_op: OperationId,
    /// Author of the losing operation.
    pub loser_node: NodeId,
    /// Which link of the chain decided.
    pub decided_by: TieBreak,
    /// When the conflict was detected.
    pub detected_at: Timestamp,
}

/// Bounded log of resolved conflicts.
#[derive(Debug)]
pub struct ConflictLog {
    records: Vec<ConflictRecord>,
    max_entries: usize,
    next_id: u64,
}

impl ConflictLog {
    /// Create a new log keeping at most `max_entries` records.
    pub fn new(max_entries: usize) -> Self {
        Self {
            records: Vec::new(),
            max_entries,
            next_id: 0,
        }
    }

    /// Records a contest on `key` and returns the stored record.
    pub fn record(&mut self, key: &str, contest: &Contest) -> ConflictRecord {
        let (winner, loser) = if contest.challenger.beats(&contest.incumbent) {
            (&contest.challenger, &contest.incumbent)
        } else {
            (&contest.incumbent, &contest.challenger)
        };

        let record = ConflictRecord {
            conflict_id: self.next_id,
            key: key.to_string(),
            field: contest.field.as_ref().map(|f| f.to_string()),
            winner_op: winner.op_id,
            winner_node: winner.node.clone(),
            loser_op: loser.op_id,
            loser_node: loser.node.clone(),
            decided_by: winner.tie_break(loser),
            detected_at: Timestamp::now(),
        };
        self.next_id += 1;

        if self.max_entries == 0 {
            return record;
        }
        // Evict the oldest quarter at capacity
        if self.records.len() >= self.max_entries {
            let evict_count = (self.max_entries / 4).max(1);
            self.records.drain(0..evict_count);
        }
        self.records.push(record.clone());
        record
    }

    /// All retained records, oldest first.
    pub fn records(&self) -> &[ConflictRecord] {
        &self.records
    }

    /// Retained records for one key.
    pub fn for_key(&self, key: &str) -> Vec<ConflictRecord> {
        self.records
            .iter()
            .filter(|r| r.key == key)
            .cloned()
            .collect()
    }

    /// Total conflicts recorded, including evicted ones.
    pub fn total(&self) -> u64 {
        self.next_id
    }

    /// Drops every retained record and returns how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.records.len();
        self.records.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Field, Stamp};
    use crate::operation::{OpType, Operation};
    use crate::vector::VersionVector;

    fn stamp(node: &str, secs: u64) -> Stamp {
        Stamp::of(&Operation::new(
            NodeId::from(node),
            Timestamp::new(secs, 0),
            VersionVector::from_pairs([(node, 1)]),
            OpType::Update,
            Vec::new(),
        ))
    }

    fn contest(a: Stamp, b: Stamp) -> Contest {
        Contest {
            field: Some(Field::Name),
            incumbent: a,
            challenger: b,
        }
    }

    #[test]
    fn test_record_picks_later_timestamp() {
        let mut log = ConflictLog::new(10);
        let rec = log.record("doc1", &contest(stamp("n1", 5), stamp("n2", 3)));
        assert_eq!(rec.winner_node, NodeId::from("n1"));
        assert_eq!(rec.loser_node, NodeId::from("n2"));
        assert_eq!(rec.decided_by, TieBreak::Timestamp);
        assert_eq!(rec.field.as_deref(), Some("name"));
    }

    #[test]
    fn test_record_node_tiebreak() {
        let mut log = ConflictLog::new(10);
        let rec = log.record("doc1", &contest(stamp("n2", 5), stamp("n1", 5)));
        assert_eq!(rec.winner_node, NodeId::from("n2"));
        assert_eq!(rec.decided_by, TieBreak::NodeId);
    }

    #[test]
    fn test_for_key_filters() {
        let mut log = ConflictLog::new(10);
        log.record("a", &contest(stamp("n1", 1), stamp("n2", 2)));
        log.record("b", &contest(stamp("n1", 1), stamp("n2", 2)));
        log.record("a", &contest(stamp("n1", 1), stamp("n2", 2)));
        assert_eq!(log.for_key("a").len(), 2);
        assert_eq!(log.for_key("b").len(), 1);
        assert!(log.for_key("c").is_empty());
    }

    #[test]
    fn test_eviction_keeps_log_bounded() {
        let mut log = ConflictLog::new(4);
        for i in 0..10 {
            log.record("k", &contest(stamp("n1", i), stamp("n2", i + 1)));
        }
        assert!(log.records().len() <= 4);
        assert_eq!(log.total(), 10);
        assert_eq!(log.records().last().unwrap().conflict_id, 9);
    }

    #[test]
    fn test_clear() {
        let mut log = ConflictLog::new(4);
        log.record("k", &contest(stamp("n1", 1), stamp("n2", 2)));
        assert_eq!(log.clear(), 1);
        assert!(log.records().is_empty());
    }
}
