use driftfs_types::DfsError;
use thiserror::Error;

/// Errors from the framing and connection layer.
#[derive(Debug, Error)]
pub enum NetError {
    /// The peer closed the connection (EOF on a frame boundary).
    #[error("connection closed")]
    ConnectionClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame's declared length exceeds the allowed maximum.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: u64 },

    /// The frame payload did not decode as a `Wrapper`.
    #[error("wire error: {0}")]
    Wire(#[from] driftfs_wire::WireError),
}

impl NetError {
    /// Whether this error means the peer simply went away, as opposed to a
    /// malformed frame.
    pub fn is_closed(&self) -> bool {
        match self {
            NetError::ConnectionClosed => true,
            NetError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

impl From<NetError> for DfsError {
    fn from(err: NetError) -> Self {
        DfsError::Transport(err.to_string())
    }
}
