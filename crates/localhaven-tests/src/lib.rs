//! LocalHaven Test & Validation Infrastructure
//!
//! A simulated multi-replica cluster over a reordering, duplicating network,
//! randomized convergence workloads, and shared test environment helpers.

pub mod cluster;
pub mod harness;

pub use cluster::{ReplicaView, SimCluster};
pub use convergence_tests::run_workload;
pub use harness::{init_tracing, TestEnv};
