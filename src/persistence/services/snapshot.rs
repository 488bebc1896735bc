//! Encoding entities into documents and reading them back on recovery.

use crate::agent::domain::Agent;
use crate::persistence::{
    domain::{AgentDocument, Collection, ConnectionDocument, Document, DocumentKey, TaskDocument},
    ports::{DocumentStore, DocumentStoreError, DocumentStoreResult},
};
use crate::task::domain::Task;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

/// Serializes a snapshot shape into a document body.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidDocument`] when serialization fails.
pub fn encode<T: Serialize>(key: &DocumentKey, snapshot: &T) -> DocumentStoreResult<Value> {
    serde_json::to_value(snapshot)
        .map_err(|err| DocumentStoreError::invalid_document(key.clone(), err))
}

fn decode<T: DeserializeOwned>(document: Document) -> DocumentStoreResult<T> {
    let Document { key, body, .. } = document;
    serde_json::from_value(body).map_err(|err| DocumentStoreError::invalid_document(key, err))
}

/// Everything read back from the store on restart.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveredState {
    /// Stored agents, including terminated tombstones.
    pub agents: Vec<Agent>,
    /// Stored tasks, including terminal ones.
    pub tasks: Vec<Task>,
    /// Stored connection configurations.
    pub connections: Vec<ConnectionDocument>,
    /// Documents that could not be decoded and were left out.
    pub skipped: Vec<DocumentKey>,
}

/// Reads every collection from `store`.
///
/// Undecodable documents are logged and listed in
/// [`RecoveredState::skipped`] rather than aborting recovery.
///
/// # Errors
///
/// Returns the store's error when a collection cannot be listed.
pub async fn load_state(store: &dyn DocumentStore) -> DocumentStoreResult<RecoveredState> {
    let mut state = RecoveredState::default();
    for collection in Collection::ALL {
        for document in store.list(collection).await? {
            let key = document.key.clone();
            let decoded = match collection {
                Collection::Agents => decode::<AgentDocument>(document)
                    .map(|stored| state.agents.push(stored.into_agent())),
                Collection::Tasks => decode::<TaskDocument>(document)
                    .map(|stored| state.tasks.push(stored.into_task())),
                Collection::Connections => decode::<ConnectionDocument>(document)
                    .map(|stored| state.connections.push(stored)),
            };
            if let Err(err) = decoded {
                tracing::warn!(document = %key, error = %err, "skipping undecodable document");
                state.skipped.push(key);
            }
        }
    }
    tracing::info!(
        agents = state.agents.len(),
        tasks = state.tasks.len(),
        connections = state.connections.len(),
        skipped = state.skipped.len(),
        "runtime state loaded"
    );
    Ok(state)
}
