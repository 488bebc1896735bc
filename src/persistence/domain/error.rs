//! Validation errors for document keys.

use thiserror::Error;

/// Errors returned while constructing document keys.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistenceDomainError {
    /// The entity id is empty after trimming.
    #[error("document entity id must not be empty")]
    EmptyEntityId,

    /// The collection name is not one the runtime stores.
    #[error(transparent)]
    UnknownCollection(#[from] ParseCollectionError),
}

/// Error returned while parsing a collection name from storage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown document collection: {0}")]
pub struct ParseCollectionError(pub String);
