//! Version vectors: per-node logical clocks and the causality relation.
//!
//! Missing entries are implicitly zero. Zero entries are never stored, so two
//! vectors describing the same history are equal as values and serialize to
//! the same bytes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque replica identifier, stable for the replica's lifetime.
///
/// Ordered lexically; the order is the last causal tie-break.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node ID from any string.
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    /// Returns the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        NodeId::new(value)
    }
}

/// Result of comparing two version vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Causality {
    /// Left happened before right.
    Before,
    /// Left happened after right.
    After,
    /// Same history.
    Equal,
    /// Neither dominates the other.
    Concurrent,
}

/// A dependency an operation is waiting on: the replica must have applied
/// `node`'s operation number `counter` before the operation is deliverable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dependency {
    /// Node whose history is incomplete.
    pub node: NodeId,
    /// Counter the local vector must reach for that node.
    pub counter: u64,
}

/// Mapping NodeId -> counter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "BTreeMap<NodeId, u64>", into = "BTreeMap<NodeId, u64>")]
pub struct VersionVector {
    entries: BTreeMap<NodeId, u64>,
}

impl VersionVector {
    /// Creates an empty vector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a vector from `(node, counter)` pairs. Later pairs overwrite earlier ones.
    pub fn from_pairs<I, N>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, u64)>,
        N: Into<NodeId>,
    {
        let mut v = Self::new();
        for (node, counter) in pairs {
            v.set(node.into(), counter);
        }
        v
    }

    /// Counter for `node`, zero when absent.
    pub fn get(&self, node: &NodeId) -> u64 {
        self.entries.get(node).copied().unwrap_or(0)
    }

    /// Sets the counter for `node`. Setting zero removes the entry.
    pub fn set(&mut self, node: NodeId, counter: u64) {
        if counter == 0 {
            self.entries.remove(&node);
        } else {
            self.entries.insert(node, counter);
        }
    }

    /// Returns a copy with `node`'s counter incremented by one.
    pub fn increment(&self, node: &NodeId) -> VersionVector {
        let mut next = self.clone();
        let counter = next.get(node).saturating_add(1);
        next.set(node.clone(), counter);
        next
    }

    /// Component-wise maximum of `self` and `other`.
    pub fn merge(&self, other: &VersionVector) -> VersionVector {
        let mut merged = self.clone();
        merged.merge_from(other);
        merged
    }

    /// In-place component-wise maximum.
    pub fn merge_from(&mut self, other: &VersionVector) {
        for (node, &counter) in &other.entries {
            let slot = self.entries.entry(node.clone()).or_insert(0);
            if counter > *slot {
                *slot = counter;
            }
        }
    }

    /// Compares two vectors over the union of their keys.
    pub fn compare(&self, other: &VersionVector) -> Causality {
        let mut less = false;
        let mut greater = false;

        for (node, &counter) in &self.entries {
            let theirs = other.get(node);
            if counter > theirs {
                greater = true;
            } else if counter < theirs {
                less = true;
            }
        }
        for (node, &counter) in &other.entries {
            if !self.entries.contains_key(node) && counter > 0 {
                less = true;
            }
        }

        match (less, greater) {
            (false, false) => Causality::Equal,
            (true, false) => Causality::Before,
            (false, true) => Causality::After,
            (true, true) => Causality::Concurrent,
        }
    }

    /// True if `self` has seen everything `other` has (After or Equal).
    pub fn dominates(&self, other: &VersionVector) -> bool {
        matches!(self.compare(other), Causality::After | Causality::Equal)
    }

    /// True if neither vector dominates the other.
    pub fn is_concurrent(&self, other: &VersionVector) -> bool {
        self.compare(other) == Causality::Concurrent
    }

    /// Finds the first dependency that keeps an operation authored by
    /// `author` with vector `op` from being delivered on a replica whose
    /// vector is `self`.
    ///
    /// The author's component may be exactly one ahead of the local one (the
    /// operation itself); every other component must already be covered.
    /// Returns `None` when the operation is deliverable. Duplicates must be
    /// filtered out by the caller beforehand.
    pub fn missing_dependency(&self, op: &VersionVector, author: &NodeId) -> Option<Dependency> {
        let needed = op.get(author).saturating_sub(1);
        if self.get(author) < needed {
            return Some(Dependency {
                node: author.clone(),
                counter: self.get(author) + 1,
            });
        }
        op.entries
            .iter()
            .filter(|(node, _)| *node != author)
            .find(|(node, &counter)| counter > self.get(node))
            .map(|(node, _)| Dependency {
                node: node.clone(),
                counter: self.get(node) + 1,
            })
    }

    /// Iterates over non-zero entries in node order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, u64)> {
        self.entries.iter().map(|(n, c)| (n, *c))
    }

    /// Number of nodes with a non-zero counter.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when every counter is zero.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<BTreeMap<NodeId, u64>> for VersionVector {
    fn from(map: BTreeMap<NodeId, u64>) -> Self {
        Self {
            entries: map.into_iter().filter(|(_, c)| *c > 0).collect(),
        }
    }
}

impl From<VersionVector> for BTreeMap<NodeId, u64> {
    fn from(v: VersionVector) -> Self {
        v.entries
    }
}

impl fmt::Display for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (node, counter)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}:{}", node, counter)?;
        }
        f.write_str("}")
    }
}
