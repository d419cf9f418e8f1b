//! Simulated multi-replica cluster with an unreliable, reordering network.
//!
//! Every locally committed operation is queued for every other replica.
//! Delivery picks a random replica and a random queued operation, so the
//! network reorders freely; [`SimCluster::duplicate_random`] re-queues an
//! already sent operation to model redelivery.

use localhaven_crdt::{AssetPatch, Operation, VersionVector};
use localhaven_replica::{Replica, ReplicaConfig, ReplicaResult};
use localhaven_store::CancelToken;
use localhaven_types::Asset;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::io::Cursor;

use crate::harness::TestEnv;

pub struct SimCluster {
    env: TestEnv,
    replicas: Vec<Replica>,
    inboxes: Vec<Vec<Operation>>,
    sent: Vec<Operation>,
    rng: StdRng,
}

/// Observable replicated state of one replica.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaView {
    pub data: BTreeMap<String, Asset>,
    pub tombstones: BTreeMap<String, VersionVector>,
    pub vector: VersionVector,
}

impl SimCluster {
    /// `size` replicas named `n1..=n<size>`, chunk size 1 KiB.
    pub fn new(size: usize, seed: u64) -> Self {
        let env = TestEnv::new("sim-cluster");
        let replicas = (1..=size)
            .map(|i| {
                let node = format!("n{i}");
                let mut config = ReplicaConfig::new(node.as_str(), env.tempdir().join(&node));
                config.store.chunk_size_kb = 1;
                Replica::open(config).expect("failed to open replica")
            })
            .collect();
        Self {
            env,
            replicas,
            inboxes: vec![Vec::new(); size],
            sent: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn size(&self) -> usize {
        self.replicas.len()
    }

    pub fn replica(&self, index: usize) -> &Replica {
        &self.replicas[index]
    }

    pub fn env(&self) -> &TestEnv {
        &self.env
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Queues `op` for every replica except `from`.
    pub fn broadcast(&mut self, from: usize, op: Operation) {
        for (i, inbox) in self.inboxes.iter_mut().enumerate() {
            if i != from {
                inbox.push(op.clone());
            }
        }
        self.sent.push(op);
    }

    pub fn create(&mut self, at: usize, asset: Asset, content: &[u8]) -> ReplicaResult<Operation> {
        let op = self.replicas[at].create_asset(
            asset,
            Cursor::new(content.to_vec()),
            &CancelToken::new(),
        )?;
        self.broadcast(at, op.clone());
        Ok(op)
    }

    pub fn update(&mut self, at: usize, patch: AssetPatch) -> ReplicaResult<Operation> {
        let op = self.replicas[at].update_asset(patch)?;
        self.broadcast(at, op.clone());
        Ok(op)
    }

    pub fn delete(&mut self, at: usize, id: &str) -> ReplicaResult<Operation> {
        let op = self.replicas[at].delete_asset(id)?;
        self.broadcast(at, op.clone());
        Ok(op)
    }

    /// Re-queues a random previously sent operation at a random replica.
    pub fn duplicate_random(&mut self) {
        if let Some(op) = self.sent.choose(&mut self.rng).cloned() {
            let target = self.rng.gen_range(0..self.replicas.len());
            self.inboxes[target].push(op);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inboxes.iter().map(Vec::len).sum()
    }

    /// Delivers one random queued operation. Returns false if nothing is queued.
    pub fn deliver_one(&mut self) -> ReplicaResult<bool> {
        let busy: Vec<usize> = (0..self.inboxes.len())
            .filter(|&i| !self.inboxes[i].is_empty())
            .collect();
        let Some(&target) = busy.choose(&mut self.rng) else {
            return Ok(false);
        };
        let pick = self.rng.gen_range(0..self.inboxes[target].len());
        let op = self.inboxes[target].swap_remove(pick);
        self.replicas[target].receive(op)?;
        Ok(true)
    }

    /// Delivers everything still queued, in random order.
    pub fn deliver_all(&mut self) -> ReplicaResult<usize> {
        let mut delivered = 0;
        while self.deliver_one()? {
            delivered += 1;
        }
        Ok(delivered)
    }

    pub fn view(&self, index: usize) -> ReplicaView {
        let engine = self.replicas[index].engine();
        ReplicaView {
            data: engine.data(),
            tombstones: engine.tombstones(),
            vector: engine.snapshot_vector(),
        }
    }

    /// True if every replica shows the same state and nothing is buffered.
    pub fn converged(&self) -> bool {
        let first = self.view(0);
        (0..self.size()).all(|i| {
            self.replicas[i].engine().pending_count() == 0 && self.view(i) == first
        })
    }
}
