//! Message-oriented TCP plumbing for DriftFS.
//!
//! Frames are an 8-byte little-endian length prefix followed by one encoded
//! [`driftfs_proto::Wrapper`]. [`MessageConn`] speaks that framing over a
//! split `TcpStream`; [`Server`] accepts connections and hands each one to a
//! [`ConnectionHandler`] task.

mod conn;
mod error;
mod server;

pub use conn::{MessageConn, FRAME_PREFIX_SIZE, MAX_FRAME_SIZE};
pub use error::NetError;
pub use server::{ConnectionHandler, Server, ServerHandle};
