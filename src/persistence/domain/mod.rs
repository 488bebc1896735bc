//! Document keys, collections and the snapshot shapes stored per entity.

mod document;
mod error;
mod key;

pub use document::{AgentDocument, ConnectionDocument, Document, TaskDocument};
pub use error::{ParseCollectionError, PersistenceDomainError};
pub use key::{Collection, DocumentKey, EntityRef};
