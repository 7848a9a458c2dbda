//! Shared primitive types and system-wide constants for DriftFS.

mod addr;
mod error;
pub mod path;

pub use addr::NodeAddr;
pub use error::{DfsError, Result};

/// Size of a file chunk in bytes. Chunks extend past this boundary until the
/// next newline so that no record is ever split across chunks.
pub const CHUNK_SIZE: usize = 1 << 18;

/// Interval between storage-node heartbeats, in seconds.
pub const HEARTBEAT_PERIOD_S: u64 = 5;

/// Interval between failure-detector sweeps on the controller, in seconds.
pub const FAILURE_DETECTOR_PERIOD_S: u64 = 5;

/// A node whose last heartbeat is older than this is declared dead.
pub const FAILURE_TIMEOUT_S: u64 = 2 * HEARTBEAT_PERIOD_S;

/// Number of additional copies a storage node creates for a client PUT
/// (three copies total including the origin).
pub const CHUNK_REPLICAS: usize = 2;

/// Maximum number of key-value lines the external sorter keeps in memory.
pub const SORT_RUN_LINES: usize = 1000;

/// A compute job gets two reducers when the target file's owner set is
/// larger than this, otherwise one.
pub const REDUCER_NODE_THRESHOLD: usize = 5;

/// Sentinel uuid the compute engine registers under so the controller can
/// tell it apart from storage nodes.
pub const COMPUTE_ENGINE_UUID: &str = "COMPUTE_ENGINE";
