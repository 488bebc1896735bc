//! Document store port.

use crate::error::{Classify, ErrorClass};
use crate::persistence::domain::{Collection, Document, DocumentKey};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

/// Key-value document persistence contract.
///
/// Writes are last-writer-wins per key. Implementations must be safe to call
/// from several tasks at once.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts or replaces the document stored under `document.key`.
    async fn put(&self, document: Document) -> DocumentStoreResult<()>;

    /// Fetches one document. Returns `None` when the key is absent.
    async fn get(&self, key: &DocumentKey) -> DocumentStoreResult<Option<Document>>;

    /// Deletes one document. Returns whether it existed.
    async fn delete(&self, key: &DocumentKey) -> DocumentStoreResult<bool>;

    /// Returns every document in a collection, ordered by entity id.
    async fn list(&self, collection: Collection) -> DocumentStoreResult<Vec<Document>>;
}

/// Errors returned by document store implementations.
#[derive(Debug, Clone, Error)]
pub enum DocumentStoreError {
    /// A stored document could not be decoded into its snapshot shape.
    #[error("invalid document {key}: {source}")]
    InvalidDocument {
        /// Offending document.
        key: DocumentKey,
        /// Decoding failure.
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// The runtime could not produce a snapshot to store.
    #[error("snapshot error: {0}")]
    Snapshot(Arc<dyn std::error::Error + Send + Sync>),

    /// Storage-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl DocumentStoreError {
    /// Wraps a decoding failure for `key`.
    pub fn invalid_document(
        key: DocumentKey,
        err: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::InvalidDocument {
            key,
            source: Arc::new(err),
        }
    }

    /// Wraps a failure to read runtime state for a snapshot.
    pub fn snapshot(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Snapshot(Arc::new(err))
    }

    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}

impl Classify for DocumentStoreError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidDocument { .. } => ErrorClass::Fatal,
            Self::Snapshot(_) => ErrorClass::Internal,
            Self::Persistence(_) => ErrorClass::Unavailable,
        }
    }

    fn entity_id(&self) -> Option<String> {
        match self {
            Self::InvalidDocument { key, .. } => Some(key.to_string()),
            Self::Snapshot(_) | Self::Persistence(_) => None,
        }
    }
}
