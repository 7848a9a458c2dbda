//! The DriftFS compute engine: job coordination plus the mapper/reducer
//! machinery that storage nodes run next to their chunks.

pub mod context;
pub mod executor;
pub mod extsort;
pub mod fnv;
mod resource_manager;

pub use context::TaskContext;
pub use extsort::ExternalSorter;
pub use resource_manager::ResourceManager;
