//! Reads component state for the journal.

use crate::agent::services::{AgentRegistry, AgentRegistryError};
use crate::persistence::domain::{AgentDocument, EntityRef, TaskDocument};
use crate::persistence::ports::{DocumentStoreError, DocumentStoreResult, SnapshotSource};
use crate::persistence::services::encode;
use crate::task::services::{TaskRouter, TaskRouterError};
use crate::tool_protocol::services::{ToolClientError, ToolClientManager};
use mockable::Clock;
use serde_json::Value;
use std::sync::Arc;

/// Snapshot source over the live components. An entity its owner no longer
/// knows reads as deleted.
pub(super) struct ComponentSnapshots<C>
where
    C: Clock + Send + Sync + 'static,
{
    pub(super) registry: Arc<AgentRegistry<C>>,
    pub(super) router: Arc<TaskRouter<C>>,
    pub(super) tools: Arc<ToolClientManager<C>>,
}

impl<C> SnapshotSource for ComponentSnapshots<C>
where
    C: Clock + Send + Sync + 'static,
{
    fn snapshot(&self, entity: EntityRef) -> DocumentStoreResult<Option<Value>> {
        let key = entity.key();
        match entity {
            EntityRef::Agent(agent_id) => match self.registry.get(agent_id) {
                Ok(agent) => encode(&key, &AgentDocument::from(&agent)).map(Some),
                Err(AgentRegistryError::UnknownAgent(_)) => Ok(None),
                Err(err) => Err(DocumentStoreError::snapshot(err)),
            },
            EntityRef::Task(task_id) => match self.router.get(task_id) {
                Ok(task) => encode(&key, &TaskDocument::from(&task)).map(Some),
                Err(TaskRouterError::UnknownTask(_)) => Ok(None),
                Err(err) => Err(DocumentStoreError::snapshot(err)),
            },
            EntityRef::Connection(connection_id) => match self.tools.status(connection_id) {
                Ok(connection) => encode(&key, &connection.to_persisted()).map(Some),
                Err(ToolClientError::UnknownConnection(_)) => Ok(None),
                Err(err) => Err(DocumentStoreError::snapshot(err)),
            },
        }
    }
}
