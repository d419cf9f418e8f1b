#![warn(missing_docs)]

//! LocalHaven chunk store: fixed-size chunked asset content on the local
//! filesystem, with a crash-safe JSON index.

pub mod cancel;
pub mod chunk;
pub mod config;
pub mod error;
pub mod filter;
pub mod fingerprint;
pub mod index;
pub mod store;

pub use cancel::CancelToken;
pub use chunk::{Chunk, ChunkId};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use filter::AssetFilter;
pub use fingerprint::Fingerprint;
pub use store::{ChunkStore, StoreStats};
