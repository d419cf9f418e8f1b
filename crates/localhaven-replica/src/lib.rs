#![warn(missing_docs)]

//! LocalHaven replica: a reconciliation engine and a chunk store behind one
//! handle, the operation log that makes the engine durable, and their
//! combined configuration.

/// Replica configuration and file loading.
pub mod config;
pub mod error;
pub mod journal;
pub mod replica;

pub use config::ReplicaConfig;
pub use error::{ReplicaError, ReplicaResult};
pub use journal::{OpJournal, JOURNAL_FILENAME};
pub use replica::Replica;
