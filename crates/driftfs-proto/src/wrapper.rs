//! The top-level frame payload and the remaining message kinds.

use std::collections::HashMap;
use std::fmt;

use driftfs_wire::{WireDecode, WireEncode, WireError};

use crate::action::ActionRequest;
use crate::types::{Chunk, FileInfo, Node, Stats};

/// A storage node (or the compute engine) announcing itself.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Registration {
    pub node: Node,
}

wire_message!(Registration { node });

/// Periodic liveness report: identity, chunk inventory (metadata only), and
/// transfer stats.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Heartbeat {
    pub node: Node,
    pub chunks: Vec<Chunk>,
    pub stats: Stats,
}

wire_message!(Heartbeat {
    node,
    chunks,
    stats,
});

/// Success/failure reply for operations with no richer response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Ack {
    pub ok: bool,
    pub error_message: String,
}

wire_message!(Ack { ok, error_message });

impl Ack {
    pub fn success() -> Self {
        Self {
            ok: true,
            error_message: String::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error_message: message.into(),
        }
    }
}

/// The controller's answer to heartbeats, PUT and CLUSTER_STATS: the
/// currently live node set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StorageNodes {
    pub nodes: Vec<Node>,
}

wire_message!(StorageNodes { nodes });

/// LS response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Files {
    pub files: Vec<FileInfo>,
}

wire_message!(Files { files });

/// Phase of a compute job, as reported to the submitting client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum JobStatus {
    #[default]
    JobAccepted = 0,
    JobMappers = 1,
    JobReducers = 2,
    JobDone = 3,
}

wire_enum!(JobStatus {
    JobAccepted = 0,
    JobMappers = 1,
    JobReducers = 2,
    JobDone = 3,
});

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::JobAccepted => "job_accepted",
            JobStatus::JobMappers => "job_mappers",
            JobStatus::JobReducers => "job_reducers",
            JobStatus::JobDone => "job_done",
        };
        f.write_str(s)
    }
}

/// Progress frame for a running job. `ok == false` is terminal. Mappers use
/// `files_table` to report where each shuffled partition file was sent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComputationStatus {
    pub status: JobStatus,
    pub ok: bool,
    pub message: String,
    pub files_table: HashMap<String, Node>,
}

wire_message!(ComputationStatus {
    status,
    ok,
    message,
    files_table,
});

impl ComputationStatus {
    pub fn progress(status: JobStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            ok: true,
            message: message.into(),
            files_table: HashMap::new(),
        }
    }

    pub fn failed(status: JobStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            ok: false,
            message: message.into(),
            files_table: HashMap::new(),
        }
    }

    /// A mapper's success report carrying its shuffle destinations.
    pub fn mapper_done(files_table: HashMap<String, Node>) -> Self {
        Self {
            status: JobStatus::JobMappers,
            ok: true,
            message: String::new(),
            files_table,
        }
    }
}

/// The discriminated union carried by every wire frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Wrapper {
    Registration(Registration),
    Heartbeat(Heartbeat),
    ActionRequest(ActionRequest),
    Ack(Ack),
    Chunk(Chunk),
    StorageNodes(StorageNodes),
    Files(Files),
    File(FileInfo),
    ComputationStatus(ComputationStatus),
}

impl Wrapper {
    fn tag(&self) -> u8 {
        match self {
            Wrapper::Registration(_) => 0,
            Wrapper::Heartbeat(_) => 1,
            Wrapper::ActionRequest(_) => 2,
            Wrapper::Ack(_) => 3,
            Wrapper::Chunk(_) => 4,
            Wrapper::StorageNodes(_) => 5,
            Wrapper::Files(_) => 6,
            Wrapper::File(_) => 7,
            Wrapper::ComputationStatus(_) => 8,
        }
    }

    /// Short variant name for logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Wrapper::Registration(_) => "Registration",
            Wrapper::Heartbeat(_) => "Heartbeat",
            Wrapper::ActionRequest(_) => "ActionRequest",
            Wrapper::Ack(_) => "Ack",
            Wrapper::Chunk(_) => "Chunk",
            Wrapper::StorageNodes(_) => "StorageNodes",
            Wrapper::Files(_) => "Files",
            Wrapper::File(_) => "File",
            Wrapper::ComputationStatus(_) => "ComputationStatus",
        }
    }
}

impl WireEncode for Wrapper {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.tag().encode(buf);
        match self {
            Wrapper::Registration(m) => m.encode(buf),
            Wrapper::Heartbeat(m) => m.encode(buf),
            Wrapper::ActionRequest(m) => m.encode(buf),
            Wrapper::Ack(m) => m.encode(buf),
            Wrapper::Chunk(m) => m.encode(buf),
            Wrapper::StorageNodes(m) => m.encode(buf),
            Wrapper::Files(m) => m.encode(buf),
            Wrapper::File(m) => m.encode(buf),
            Wrapper::ComputationStatus(m) => m.encode(buf),
        }
    }
}

impl WireDecode for Wrapper {
    fn decode(buf: &[u8], pos: &mut usize) -> Result<Self, WireError> {
        let tag = u8::decode(buf, pos)?;
        match tag {
            0 => Ok(Wrapper::Registration(Registration::decode(buf, pos)?)),
            1 => Ok(Wrapper::Heartbeat(Heartbeat::decode(buf, pos)?)),
            2 => Ok(Wrapper::ActionRequest(ActionRequest::decode(buf, pos)?)),
            3 => Ok(Wrapper::Ack(Ack::decode(buf, pos)?)),
            4 => Ok(Wrapper::Chunk(Chunk::decode(buf, pos)?)),
            5 => Ok(Wrapper::StorageNodes(StorageNodes::decode(buf, pos)?)),
            6 => Ok(Wrapper::Files(Files::decode(buf, pos)?)),
            7 => Ok(Wrapper::File(FileInfo::decode(buf, pos)?)),
            8 => Ok(Wrapper::ComputationStatus(ComputationStatus::decode(buf, pos)?)),
            other => Err(WireError::InvalidVariant {
                type_name: "Wrapper",
                value: other as u64,
            }),
        }
    }
}
