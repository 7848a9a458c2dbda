//! Storage-node side of DriftFS: durable chunk storage, replication, the
//! heartbeat loop, and co-located map/reduce execution.

mod chunk_store;
mod compute;
mod node;
mod stats;

pub use chunk_store::ChunkStore;
pub use node::{StorageNode, StorageNodeConfig};
pub use stats::StatsBoard;
