//! Pending buffer for operations awaiting missing causal dependencies.
//!
//! When an operation arrives before one of the operations it depends on, it
//! is parked here under the first dependency it is missing. Applying the
//! operation that satisfies that dependency releases it for a re-check; if
//! it is still blocked it is parked again under its next missing dependency.

use std::collections::{BTreeMap, HashSet};

use crate::operation::{Operation, OperationId};
use crate::payload::OpPayload;
use crate::vector::{Dependency, NodeId};

/// An operation waiting for its dependencies, with its already-decoded payload.
#[derive(Debug, Clone)]
pub struct PendingOp {
    /// The operation itself.
    pub op: Operation,
    /// Decoded payload, validated on arrival.
    pub payload: OpPayload,
}

/// Operations keyed by the dependency they are blocked on.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    waiting: BTreeMap<Dependency, Vec<PendingOp>>,
    ids: HashSet<OperationId>,
}

impl PendingBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks `entry` under `dep`. Returns false if the operation is already buffered.
    pub fn park(&mut self, dep: Dependency, entry: PendingOp) -> bool {
        if !self.ids.insert(entry.op.id) {
            return false;
        }
        self.waiting.entry(dep).or_default().push(entry);
        true
    }

    /// Removes and returns every operation blocked on `node` reaching `counter`.
    pub fn release(&mut self, node: &NodeId, counter: u64) -> Vec<PendingOp> {
        let dep = Dependency {
            node: node.clone(),
            counter,
        };
        let released = self.waiting.remove(&dep).unwrap_or_default();
        for entry in &released {
            self.ids.remove(&entry.op.id);
        }
        released
    }

    /// True if the operation is buffered.
    pub fn contains(&self, id: &OperationId) -> bool {
        self.ids.contains(id)
    }

    /// Dependency an already-buffered operation waits on.
    pub fn dependency_of(&self, id: &OperationId) -> Option<Dependency> {
        self.waiting
            .iter()
            .find(|(_, ops)| ops.iter().any(|p| p.op.id == *id))
            .map(|(dep, _)| dep.clone())
    }

    /// Number of buffered operations.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Distinct dependencies currently blocking operations, with the number
    /// of operations blocked on each.
    pub fn dependencies(&self) -> Vec<(Dependency, usize)> {
        self.waiting
            .iter()
            .map(|(dep, ops)| (dep.clone(), ops.len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OpType;
    use crate::vector::VersionVector;
    use localhaven_types::Timestamp;

    fn pending(node: &str, counter: u64) -> PendingOp {
        PendingOp {
            op: Operation::new(
                NodeId::from(node),
                Timestamp::new(1, 0),
                VersionVector::from_pairs([(node, counter)]),
                OpType::Delete,
                br#""k""#.to_vec(),
            ),
            payload: OpPayload::Delete("k".into()),
        }
    }

    fn dep(node: &str, counter: u64) -> Dependency {
        Dependency {
            node: node.into(),
            counter,
        }
    }

    #[test]
    fn test_park_and_release() {
        let mut buf = PendingBuffer::new();
        assert!(buf.park(dep("n1", 1), pending("n1", 2)));
        assert!(buf.park(dep("n1", 1), pending("n1", 3)));
        assert_eq!(buf.len(), 2);

        assert!(buf.release(&"n1".into(), 2).is_empty());
        let released = buf.release(&"n1".into(), 1);
        assert_eq!(released.len(), 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_park_same_operation_twice() {
        let mut buf = PendingBuffer::new();
        let p = pending("n1", 2);
        assert!(buf.park(dep("n1", 1), p.clone()));
        assert!(!buf.park(dep("n1", 1), p.clone()));
        assert_eq!(buf.len(), 1);
        assert!(buf.contains(&p.op.id));
        assert_eq!(buf.dependency_of(&p.op.id), Some(dep("n1", 1)));
    }

    #[test]
    fn test_dependencies_summary() {
        let mut buf = PendingBuffer::new();
        buf.park(dep("n1", 1), pending("n1", 2));
        buf.park(dep("n2", 4), pending("n3", 1));
        buf.park(dep("n2", 4), pending("n3", 2));
        assert_eq!(buf.dependencies(), vec![(dep("n1", 1), 1), (dep("n2", 4), 2)]);
    }
}
