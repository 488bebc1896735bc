//! In-memory document store for tests and single-process hosts.

use crate::persistence::{
    domain::{Collection, Document, DocumentKey},
    ports::{DocumentStore, DocumentStoreError, DocumentStoreResult},
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Thread-safe in-memory document store.
///
/// Clones share the same documents.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentStore {
    documents: Arc<RwLock<BTreeMap<DocumentKey, Document>>>,
}

impl InMemoryDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> DocumentStoreResult<RwLockReadGuard<'_, BTreeMap<DocumentKey, Document>>> {
        self.documents.read().map_err(|err| {
            DocumentStoreError::persistence(std::io::Error::other(err.to_string()))
        })
    }

    fn write(
        &self,
    ) -> DocumentStoreResult<RwLockWriteGuard<'_, BTreeMap<DocumentKey, Document>>> {
        self.documents.write().map_err(|err| {
            DocumentStoreError::persistence(std::io::Error::other(err.to_string()))
        })
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn put(&self, document: Document) -> DocumentStoreResult<()> {
        self.write()?.insert(document.key.clone(), document);
        Ok(())
    }

    async fn get(&self, key: &DocumentKey) -> DocumentStoreResult<Option<Document>> {
        Ok(self.read()?.get(key).cloned())
    }

    async fn delete(&self, key: &DocumentKey) -> DocumentStoreResult<bool> {
        Ok(self.write()?.remove(key).is_some())
    }

    async fn list(&self, collection: Collection) -> DocumentStoreResult<Vec<Document>> {
        Ok(self
            .read()?
            .values()
            .filter(|document| document.key.collection() == collection)
            .cloned()
            .collect())
    }
}
