//! Client- and coordinator-originated requests.

use crate::types::{Chunk, Node, Plugin};

/// What an [`ActionRequest`] asks the receiver to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ActionType {
    #[default]
    Ls = 0,
    Get = 1,
    Put = 2,
    Rm = 3,
    Compute = 4,
    ComputeStore = 5,
    ClusterStats = 6,
}

wire_enum!(ActionType {
    Ls = 0,
    Get = 1,
    Put = 2,
    Rm = 3,
    Compute = 4,
    ComputeStore = 5,
    ClusterStats = 6,
});

/// Which plugin entry point a compute request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ComputeType {
    #[default]
    Map = 0,
    Reduce = 1,
}

wire_enum!(ComputeType { Map = 0, Reduce = 1 });

impl ComputeType {
    /// The argv[1] value passed to the plugin subprocess.
    pub fn as_arg(&self) -> &'static str {
        match self {
            ComputeType::Map => "MAP",
            ComputeType::Reduce => "REDUCE",
        }
    }
}

/// A request frame. Only the fields relevant to `action` are populated;
/// everything else stays at its default. The constructors below are the
/// catalogue of shapes the system actually sends.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActionRequest {
    pub action: ActionType,
    /// Target DFS path for file-level actions, or the stored filename for
    /// `ComputeStore`.
    pub file_name: String,
    /// Target chunk for chunk-level GET/RM and for mapper dispatch.
    pub chunk_name: String,
    /// Payload for a chunk PUT.
    pub chunk: Option<Chunk>,
    pub plugin: Option<Plugin>,
    pub compute_type: ComputeType,
    /// Reducer assignment a mapper shuffles its partitions to.
    pub reducers: Vec<Node>,
    pub reducer_number: i32,
    /// Input partition files for a reduce task.
    pub file_names: Vec<String>,
    /// Raw bytes for `ComputeStore`.
    pub data: Vec<u8>,
    pub output_filename: String,
}

wire_message!(ActionRequest {
    action,
    file_name,
    chunk_name,
    chunk,
    plugin,
    compute_type,
    reducers,
    reducer_number,
    file_names,
    data,
    output_filename,
});

impl ActionRequest {
    pub fn ls() -> Self {
        Self {
            action: ActionType::Ls,
            ..Default::default()
        }
    }

    pub fn cluster_stats() -> Self {
        Self {
            action: ActionType::ClusterStats,
            ..Default::default()
        }
    }

    pub fn get_file(file_name: impl Into<String>) -> Self {
        Self {
            action: ActionType::Get,
            file_name: file_name.into(),
            ..Default::default()
        }
    }

    pub fn put_file(file_name: impl Into<String>) -> Self {
        Self {
            action: ActionType::Put,
            file_name: file_name.into(),
            ..Default::default()
        }
    }

    pub fn rm_file(file_name: impl Into<String>) -> Self {
        Self {
            action: ActionType::Rm,
            file_name: file_name.into(),
            ..Default::default()
        }
    }

    pub fn get_chunk(chunk_name: impl Into<String>) -> Self {
        Self {
            action: ActionType::Get,
            chunk_name: chunk_name.into(),
            ..Default::default()
        }
    }

    pub fn put_chunk(chunk: Chunk) -> Self {
        Self {
            action: ActionType::Put,
            chunk: Some(chunk),
            ..Default::default()
        }
    }

    pub fn rm_chunk(chunk_name: impl Into<String>) -> Self {
        Self {
            action: ActionType::Rm,
            chunk_name: chunk_name.into(),
            ..Default::default()
        }
    }

    /// A client's job submission: run `plugin` over `file_name`, leave the
    /// result at `output_filename`. Reducers are assigned later by the
    /// resource manager.
    pub fn compute_job(
        file_name: impl Into<String>,
        plugin: Plugin,
        output_filename: impl Into<String>,
    ) -> Self {
        Self {
            action: ActionType::Compute,
            file_name: file_name.into(),
            plugin: Some(plugin),
            compute_type: ComputeType::Map,
            output_filename: output_filename.into(),
            ..Default::default()
        }
    }

    /// Mapper dispatch: map one local chunk, shuffling output to `reducers`.
    pub fn compute_map(
        chunk_name: impl Into<String>,
        plugin: Plugin,
        output_filename: impl Into<String>,
        reducers: Vec<Node>,
    ) -> Self {
        Self {
            action: ActionType::Compute,
            chunk_name: chunk_name.into(),
            plugin: Some(plugin),
            compute_type: ComputeType::Map,
            reducers,
            output_filename: output_filename.into(),
            ..Default::default()
        }
    }

    /// Reducer dispatch: merge + reduce the named partition files.
    pub fn compute_reduce(
        file_names: Vec<String>,
        plugin: Plugin,
        reducer_number: i32,
        output_filename: impl Into<String>,
    ) -> Self {
        Self {
            action: ActionType::Compute,
            plugin: Some(plugin),
            compute_type: ComputeType::Reduce,
            reducer_number,
            file_names,
            output_filename: output_filename.into(),
            ..Default::default()
        }
    }

    /// Shuffle transfer: store `data` under `file_name` in the receiver's
    /// compute-scratch directory.
    pub fn compute_store(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            action: ActionType::ComputeStore,
            file_name: file_name.into(),
            data,
            ..Default::default()
        }
    }
}
