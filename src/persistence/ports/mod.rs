//! Contracts implemented by document storage adapters and snapshot sources.

mod source;
mod store;

pub use source::SnapshotSource;
pub use store::{DocumentStore, DocumentStoreError, DocumentStoreResult};
