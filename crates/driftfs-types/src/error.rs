use thiserror::Error;

/// Errors surfaced by DriftFS operations.
///
/// The first four variants correspond to failure acks on the wire; the rest
/// stay local to the process that hit them.
#[derive(Debug, Error)]
pub enum DfsError {
    /// The requested file is not present in the file index.
    #[error("{0} doesn't exist")]
    NotFound(String),

    /// A PUT collided with an existing or pending filename.
    #[error("{0}")]
    Conflict(String),

    /// A PUT arrived while no storage nodes were online.
    #[error("Currently there are no Storage Nodes online")]
    NoCapacity,

    /// A mapper or reducer failed, or the coordinator lost a worker.
    #[error("compute failed: {0}")]
    Compute(String),

    /// A connection-level failure (closed, truncated, undecodable frame).
    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent something the current protocol state does not allow.
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),
}

pub type Result<T, E = DfsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = DfsError::NotFound("/a/b.txt".into());
        assert_eq!(err.to_string(), "/a/b.txt doesn't exist");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: DfsError = io.into();
        assert!(matches!(err, DfsError::Io(_)));
        assert!(err.to_string().contains("gone"));
    }
}
