//! Data-carrying message types shared by all roles.

use std::collections::HashMap;

use driftfs_types::NodeAddr;
use driftfs_wire::wire_seq;

/// Transfer counters and capacity a storage node reports with each heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    pub downloaded: u32,
    pub uploaded: u32,
    pub replicated: u32,
    pub free_space_gb: u32,
}

wire_message!(Stats {
    downloaded,
    uploaded,
    replicated,
    free_space_gb,
});

/// A storage node as seen by the rest of the cluster.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    /// Stable identifier, assigned once at node startup.
    pub uuid: String,
    pub hostname: String,
    pub port: u16,
    pub stats: Stats,
}

wire_message!(Node {
    uuid,
    hostname,
    port,
    stats,
});

wire_seq!(Node);

impl Node {
    pub fn new(uuid: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        Self {
            uuid: uuid.into(),
            hostname: hostname.into(),
            port,
            stats: Stats::default(),
        }
    }

    pub fn addr(&self) -> NodeAddr {
        NodeAddr::new(self.hostname.clone(), self.port)
    }
}

/// One newline-aligned byte range of a file.
///
/// `chunk_name` is `<file_name>-<serial>`; serials are dense starting at 0,
/// and each chunk's offset is the previous chunk's offset plus its size.
/// Metadata-only copies (heartbeat inventory, file-index entries) leave
/// `data` empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Chunk {
    pub file_name: String,
    pub chunk_name: String,
    pub serial: i32,
    pub offset: u64,
    pub size: u64,
    pub file_size: u64,
    pub data: Vec<u8>,
    /// Owning nodes keyed by uuid. Empty on a client-originated PUT; the
    /// first storage node fills in itself before fanning out replicas.
    pub storage_nodes: HashMap<String, Node>,
}

wire_message!(Chunk {
    file_name,
    chunk_name,
    serial,
    offset,
    size,
    file_size,
    data,
    storage_nodes,
});

wire_seq!(Chunk);

impl Chunk {
    /// Copy of this chunk without its payload, for inventory reports.
    pub fn metadata_only(&self) -> Chunk {
        Chunk {
            file_name: self.file_name.clone(),
            chunk_name: self.chunk_name.clone(),
            serial: self.serial,
            offset: self.offset,
            size: self.size,
            file_size: self.file_size,
            data: Vec::new(),
            storage_nodes: HashMap::new(),
        }
    }
}

/// A user-supplied map/reduce executable shipped with a compute request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Plugin {
    pub name: String,
    pub bytes: Vec<u8>,
}

wire_message!(Plugin { name, bytes });

/// A file as the index knows it: its DFS path and chunk set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileInfo {
    /// Basename, for display.
    pub name: String,
    /// Full DFS path, the key in the file index.
    pub path: String,
    pub chunks: Vec<Chunk>,
}

wire_message!(FileInfo { name, path, chunks });

wire_seq!(FileInfo);
