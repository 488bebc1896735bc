//! Port contracts for model backends.

mod backend;

pub use backend::{BackendError, BackendHealth, BackendResult, ChunkStream, ModelBackend};
