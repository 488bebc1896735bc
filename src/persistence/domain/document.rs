//! Stored documents and the per-entity snapshot shapes.

use super::DocumentKey;
use crate::agent::domain::{
    Agent, AgentId, AgentState, Capability, CapabilitySet, PersistedAgentData,
};
use crate::task::domain::{PersistedTaskData, Priority, Task, TaskId, TaskOutcome, TaskStatus};
use crate::tool_protocol::domain::PersistedConnectionData;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON document as held by a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Storage address.
    pub key: DocumentKey,
    /// Document body.
    pub body: Value,
    /// Time the snapshot was taken.
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Creates a document.
    #[must_use]
    pub const fn new(key: DocumentKey, body: Value, updated_at: DateTime<Utc>) -> Self {
        Self {
            key,
            body,
            updated_at,
        }
    }
}

/// Stored form of an agent registry entry.
///
/// The mailbox is transient and re-opened on recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDocument {
    /// Agent identifier.
    pub id: AgentId,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Declared capabilities.
    pub capabilities: CapabilitySet,
    /// Lifecycle state at snapshot time.
    pub state: AgentState,
    /// Private state blob.
    #[serde(default)]
    pub state_blob: Value,
    /// Registration order.
    pub registration_seq: u64,
    /// Registration timestamp.
    pub registered_at: DateTime<Utc>,
    /// Latest change timestamp.
    pub updated_at: DateTime<Utc>,
}

impl From<&Agent> for AgentDocument {
    fn from(agent: &Agent) -> Self {
        Self {
            id: agent.id(),
            name: agent.name().map(str::to_owned),
            capabilities: agent.capabilities().clone(),
            state: agent.state(),
            state_blob: agent.state_blob().clone(),
            registration_seq: agent.registration_seq(),
            registered_at: agent.registered_at(),
            updated_at: agent.updated_at(),
        }
    }
}

impl AgentDocument {
    /// Rebuilds the agent aggregate.
    #[must_use]
    pub fn into_agent(self) -> Agent {
        Agent::from_persisted(PersistedAgentData {
            id: self.id,
            name: self.name,
            capabilities: self.capabilities,
            state: self.state,
            state_blob: self.state_blob,
            registration_seq: self.registration_seq,
            registered_at: self.registered_at,
            updated_at: self.updated_at,
        })
    }
}

/// Stored form of a task table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDocument {
    /// Task identifier.
    pub id: TaskId,
    /// Required capability.
    pub capability: Capability,
    /// Opaque payload.
    pub payload: Value,
    /// Priority.
    pub priority: Priority,
    /// Status at snapshot time.
    pub status: TaskStatus,
    /// Holder at snapshot time.
    #[serde(default)]
    pub assignee: Option<AgentId>,
    /// Terminal outcome.
    #[serde(default)]
    pub outcome: Option<TaskOutcome>,
    /// Submission order.
    pub submission_seq: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Latest change timestamp.
    pub updated_at: DateTime<Utc>,
}

impl From<&Task> for TaskDocument {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id(),
            capability: task.capability().clone(),
            payload: task.payload().clone(),
            priority: task.priority(),
            status: task.status(),
            assignee: task.assignee(),
            outcome: task.outcome().cloned(),
            submission_seq: task.submission_seq(),
            created_at: task.created_at(),
            updated_at: task.updated_at(),
        }
    }
}

impl TaskDocument {
    /// Rebuilds the task aggregate.
    #[must_use]
    pub fn into_task(self) -> Task {
        Task::from_persisted(PersistedTaskData {
            id: self.id,
            capability: self.capability,
            payload: self.payload,
            priority: self.priority,
            status: self.status,
            assignee: self.assignee,
            outcome: self.outcome,
            submission_seq: self.submission_seq,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Stored form of a tool connection. Only configuration survives; session
/// state is re-derived by reconnecting.
pub type ConnectionDocument = PersistedConnectionData;
