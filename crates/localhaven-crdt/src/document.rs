//! Per-key replicated document state.
//!
//! Every field of an asset (`name`, `type`, `size`, `chunks`, `created_at`,
//! `updated_at` and each `metadata.<key>`) is a register holding the
//! antichain of causally-maximal writes to it. A key additionally remembers
//! all of its Delete stamps and the maximal Insert stamps.
//!
//! A write is hidden when a Delete beats it in the conflict chain or when an
//! Insert causally follows it. The visible value of a field is the chain
//! winner among its non-hidden writes.
//!
//! Presence is decided separately. A key that was never deleted is present
//! as soon as any write is visible (updates upsert). Once a Delete exists,
//! only an Insert that no Delete beats keeps the key present; updates may
//! still set field values but never bring a tombstoned key back.
//!
//! Everything here is a function of the set of applied operations, so
//! delivery order never changes the result.

use localhaven_types::{Asset, AssetKind, Metadata, MetadataValue, Timestamp};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::operation::{Operation, OperationId};
use crate::payload::AssetPatch;
use crate::vector::{Causality, NodeId, VersionVector};

/// Causal position of a write plus the tie-break fields of the conflict chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    /// Operation that produced the write.
    pub op_id: OperationId,
    /// Author of the operation.
    pub node: NodeId,
    /// Advisory wall-clock time.
    pub timestamp: Timestamp,
    /// Causal snapshot of the operation.
    pub vector: VersionVector,
}

/// Which link of the conflict chain decided between two concurrent writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TieBreak {
    /// Later wall-clock timestamp won.
    Timestamp,
    /// Lexically higher node ID won.
    NodeId,
    /// Higher operation ID won (same node, same timestamp).
    OperationId,
}

impl Stamp {
    /// Stamp of an operation.
    pub fn of(op: &Operation) -> Self {
        Self {
            op_id: op.id,
            node: op.node_id.clone(),
            timestamp: op.timestamp,
            vector: op.vector.clone(),
        }
    }

    /// Total order used to pick winners: causal order first, then
    /// timestamp, node ID and operation ID.
    pub fn chain_cmp(&self, other: &Stamp) -> Ordering {
        match self.vector.compare(&other.vector) {
            Causality::After => Ordering::Greater,
            Causality::Before => Ordering::Less,
            Causality::Equal | Causality::Concurrent => self
                .timestamp
                .cmp(&other.timestamp)
                .then_with(|| self.node.cmp(&other.node))
                .then_with(|| self.op_id.cmp(&other.op_id)),
        }
    }

    /// True if `self` wins against `other`.
    pub fn beats(&self, other: &Stamp) -> bool {
        self.chain_cmp(other) == Ordering::Greater
    }

    /// The link of the chain that separates two non-comparable stamps.
    pub fn tie_break(&self, other: &Stamp) -> TieBreak {
        if self.timestamp != other.timestamp {
            TieBreak::Timestamp
        } else if self.node != other.node {
            TieBreak::NodeId
        } else {
            TieBreak::OperationId
        }
    }
}

/// Addressable field of an asset document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    /// `name`
    Name,
    /// `type`
    Kind,
    /// `size`
    Size,
    /// `chunks`
    Chunks,
    /// `created_at`
    CreatedAt,
    /// `updated_at`
    UpdatedAt,
    /// `metadata.<key>`
    Meta(String),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Name => f.write_str("name"),
            Field::Kind => f.write_str("type"),
            Field::Size => f.write_str("size"),
            Field::Chunks => f.write_str("chunks"),
            Field::CreatedAt => f.write_str("created_at"),
            Field::UpdatedAt => f.write_str("updated_at"),
            Field::Meta(k) => write!(f, "metadata.{}", k),
        }
    }
}

/// A value written to one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldWrite {
    /// New name.
    Name(String),
    /// New kind.
    Kind(AssetKind),
    /// New size.
    Size(u64),
    /// New chunk list.
    Chunks(Vec<String>),
    /// New creation time.
    CreatedAt(Timestamp),
    /// New modification time.
    UpdatedAt(Timestamp),
    /// Metadata entry; `None` removes it.
    Meta(String, Option<MetadataValue>),
}

impl FieldWrite {
    /// The field this write targets.
    pub fn field(&self) -> Field {
        match self {
            FieldWrite::Name(_) => Field::Name,
            FieldWrite::Kind(_) => Field::Kind,
            FieldWrite::Size(_) => Field::Size,
            FieldWrite::Chunks(_) => Field::Chunks,
            FieldWrite::CreatedAt(_) => Field::CreatedAt,
            FieldWrite::UpdatedAt(_) => Field::UpdatedAt,
            FieldWrite::Meta(k, _) => Field::Meta(k.clone()),
        }
    }

    /// Every field of a full document.
    pub fn from_asset(asset: &Asset) -> Vec<FieldWrite> {
        let mut writes = vec![
            FieldWrite::Name(asset.name.clone()),
            FieldWrite::Kind(asset.kind.clone()),
            FieldWrite::Size(asset.size),
            FieldWrite::Chunks(asset.chunks.clone()),
            FieldWrite::CreatedAt(asset.created_at),
            FieldWrite::UpdatedAt(asset.updated_at),
        ];
        writes.extend(
            asset
                .metadata
                .iter()
                .map(|(k, v)| FieldWrite::Meta(k.clone(), Some(v.clone()))),
        );
        writes
    }

    /// The fields a patch sets.
    pub fn from_patch(patch: &AssetPatch) -> Vec<FieldWrite> {
        let mut writes = Vec::new();
        if let Some(name) = &patch.name {
            writes.push(FieldWrite::Name(name.clone()));
        }
        if let Some(kind) = &patch.kind {
            writes.push(FieldWrite::Kind(kind.clone()));
        }
        if let Some(size) = patch.size {
            writes.push(FieldWrite::Size(size));
        }
        if let Some(chunks) = &patch.chunks {
            writes.push(FieldWrite::Chunks(chunks.clone()));
        }
        if let Some(at) = patch.updated_at {
            writes.push(FieldWrite::UpdatedAt(at));
        }
        writes.extend(
            patch
                .metadata
                .iter()
                .map(|(k, v)| FieldWrite::Meta(k.clone(), v.clone())),
        );
        writes
    }
}

#[derive(Debug, Clone)]
struct Head {
    stamp: Stamp,
    value: FieldWrite,
}

/// Two concurrent writes that met on the same field (or a write and a delete).
#[derive(Debug, Clone)]
pub struct Contest {
    /// Contested field; `None` for a delete against the whole key.
    pub field: Option<Field>,
    /// The write already present.
    pub incumbent: Stamp,
    /// The write being applied.
    pub challenger: Stamp,
}

/// Adds `stamp` to an antichain of maximal stamps.
///
/// Returns false when it is already present or dominated.
fn insert_maximal<T>(items: &mut Vec<T>, item: T, stamp: impl Fn(&T) -> &Stamp) -> bool {
    let new = stamp(&item);
    for existing in items.iter() {
        let existing = stamp(existing);
        if existing.op_id == new.op_id || existing.vector.compare(&new.vector) == Causality::After
        {
            return false;
        }
    }
    let new_vector = new.vector.clone();
    items.retain(|e| stamp(e).vector.compare(&new_vector) != Causality::Before);
    items.push(item);
    true
}

/// Replicated state of one key.
#[derive(Debug, Clone, Default)]
pub struct KeyState {
    fields: BTreeMap<Field, Vec<Head>>,
    inserts: Vec<Stamp>,
    deletes: Vec<Stamp>,
}

impl KeyState {
    /// Applies a full document.
    pub fn apply_insert(&mut self, stamp: &Stamp, asset: &Asset) -> Vec<Contest> {
        insert_maximal(&mut self.inserts, stamp.clone(), |s| s);
        self.write_all(stamp, FieldWrite::from_asset(asset))
    }

    /// Applies a field-level change.
    pub fn apply_update(&mut self, stamp: &Stamp, patch: &AssetPatch) -> Vec<Contest> {
        self.write_all(stamp, FieldWrite::from_patch(patch))
    }

    /// Records a delete.
    pub fn apply_delete(&mut self, stamp: &Stamp) -> Vec<Contest> {
        if self.deletes.iter().any(|d| d.op_id == stamp.op_id) {
            return Vec::new();
        }

        let mut contests: Vec<Contest> = Vec::new();
        for head in self.fields.values().flatten() {
            if self.is_hidden(&head.stamp) || !head.stamp.vector.is_concurrent(&stamp.vector) {
                continue;
            }
            if contests.iter().any(|c| c.incumbent.op_id == head.stamp.op_id) {
                continue;
            }
            contests.push(Contest {
                field: None,
                incumbent: head.stamp.clone(),
                challenger: stamp.clone(),
            });
        }

        self.deletes.push(stamp.clone());
        contests
    }

    fn write_all(&mut self, stamp: &Stamp, writes: Vec<FieldWrite>) -> Vec<Contest> {
        let mut contests = Vec::new();
        for write in writes {
            let field = write.field();
            let visible: Vec<Stamp> = self
                .fields
                .get(&field)
                .map(|heads| {
                    heads
                        .iter()
                        .filter(|h| !self.is_hidden(&h.stamp))
                        .filter(|h| h.stamp.vector.is_concurrent(&stamp.vector))
                        .map(|h| h.stamp.clone())
                        .collect()
                })
                .unwrap_or_default();

            let heads = self.fields.entry(field.clone()).or_default();
            let head = Head {
                stamp: stamp.clone(),
                value: write,
            };
            if insert_maximal(heads, head, |h| &h.stamp) {
                contests.extend(visible.into_iter().map(|incumbent| Contest {
                    field: Some(field.clone()),
                    incumbent,
                    challenger: stamp.clone(),
                }));
            }
        }
        contests
    }

    /// True if a delete beats `stamp` or an insert causally follows it.
    fn is_hidden(&self, stamp: &Stamp) -> bool {
        self.deletes.iter().any(|d| d.beats(stamp))
            || self
                .inserts
                .iter()
                .any(|i| i.vector.compare(&stamp.vector) == Causality::After)
    }

    /// True if the key is present rather than tombstoned or never written.
    pub fn is_present(&self) -> bool {
        if self.deletes.is_empty() {
            return self
                .fields
                .values()
                .flatten()
                .any(|h| !self.is_hidden(&h.stamp));
        }
        self.inserts.iter().any(|i| !self.is_hidden(i))
    }

    /// Materializes the visible document, or `None` when the key is not
    /// present.
    ///
    /// Fields no visible write has set take defaults: empty name, binary
    /// kind, zero size, no chunks, and the earliest / latest visible write
    /// time for `created_at` / `updated_at`.
    pub fn materialize(&self, key: &str) -> Option<Asset> {
        if !self.is_present() {
            return None;
        }

        let mut name = None;
        let mut kind = None;
        let mut size = None;
        let mut chunks = None;
        let mut created_at = None;
        let mut updated_at = None;
        let mut metadata = Metadata::new();
        let mut earliest: Option<Timestamp> = None;
        let mut latest: Option<Timestamp> = None;

        for heads in self.fields.values() {
            let winner = heads
                .iter()
                .filter(|h| !self.is_hidden(&h.stamp))
                .max_by(|a, b| a.stamp.chain_cmp(&b.stamp));
            let Some(winner) = winner else {
                continue;
            };

            let ts = winner.stamp.timestamp;
            earliest = Some(earliest.map_or(ts, |e| e.min(ts)));
            latest = Some(latest.map_or(ts, |l| l.max(ts)));

            match &winner.value {
                FieldWrite::Name(v) => name = Some(v.clone()),
                FieldWrite::Kind(v) => kind = Some(v.clone()),
                FieldWrite::Size(v) => size = Some(*v),
                FieldWrite::Chunks(v) => chunks = Some(v.clone()),
                FieldWrite::CreatedAt(v) => created_at = Some(*v),
                FieldWrite::UpdatedAt(v) => updated_at = Some(*v),
                FieldWrite::Meta(k, Some(v)) => {
                    metadata.insert(k.clone(), v.clone());
                }
                FieldWrite::Meta(_, None) => {}
            }
        }

        let earliest = earliest?;
        let latest = latest.unwrap_or(earliest);
        Some(Asset {
            id: key.to_string(),
            name: name.unwrap_or_default(),
            kind: kind.unwrap_or_default(),
            size: size.unwrap_or(0),
            chunks: chunks.unwrap_or_default(),
            created_at: created_at.unwrap_or(earliest),
            updated_at: updated_at.unwrap_or(latest),
            metadata,
        })
    }

    /// Merge of every delete vector recorded for this key.
    pub fn deletion_vector(&self) -> Option<VersionVector> {
        if self.deletes.is_empty() {
            return None;
        }
        let mut merged = VersionVector::new();
        for d in &self.deletes {
            merged.merge_from(&d.vector);
        }
        Some(merged)
    }
}
