//! The DriftFS controller: membership tracking with failure detection, the
//! authoritative file index, and the client/storage-node facing service.

mod file_index;
mod membership;
mod service;

pub use file_index::FileIndex;
pub use membership::Membership;
pub use service::Controller;
