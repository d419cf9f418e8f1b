#![warn(missing_docs)]

//! LocalHaven shared types: assets, typed metadata values and wall-clock timestamps.
//!
//! These types are the replicated value of the reconciliation engine and the
//! persisted record of the chunk store, so both sides agree on one shape.

pub mod asset;
pub mod metadata;
pub mod time;

pub use asset::{Asset, AssetKind};
pub use metadata::{Metadata, MetadataValue};
pub use time::Timestamp;
