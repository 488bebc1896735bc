//! Agent aggregate root.

use super::{
    AgentDomainError, AgentId, AgentState, AgentTransition, CapabilitySet, LifecycleEvent,
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A registered agent instance.
///
/// The capability set is fixed at construction and has no mutator. The
/// private state blob is opaque to the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    id: AgentId,
    name: Option<String>,
    capabilities: CapabilitySet,
    state: AgentState,
    state_blob: Value,
    registration_seq: u64,
    registered_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Parameter object for reconstructing a persisted agent.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedAgentData {
    /// Persisted identifier.
    pub id: AgentId,
    /// Persisted display name.
    pub name: Option<String>,
    /// Persisted capability set.
    pub capabilities: CapabilitySet,
    /// Persisted lifecycle state.
    pub state: AgentState,
    /// Persisted private state.
    pub state_blob: Value,
    /// Persisted registration order.
    pub registration_seq: u64,
    /// Persisted registration timestamp.
    pub registered_at: DateTime<Utc>,
    /// Persisted latest change timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Creates a freshly registered agent in the given initial state.
    #[must_use]
    pub fn new(
        capabilities: CapabilitySet,
        initial_state: AgentState,
        registration_seq: u64,
        clock: &impl Clock,
    ) -> Self {
        let timestamp = clock.utc();
        Self {
            id: AgentId::new(),
            name: None,
            capabilities,
            state: initial_state,
            state_blob: Value::Null,
            registration_seq,
            registered_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Sets a display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Reconstructs an agent from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedAgentData) -> Self {
        Self {
            id: data.id,
            name: data.name,
            capabilities: data.capabilities,
            state: data.state,
            state_blob: data.state_blob,
            registration_seq: data.registration_seq,
            registered_at: data.registered_at,
            updated_at: data.updated_at,
        }
    }

    /// Returns the agent identifier.
    #[must_use]
    pub const fn id(&self) -> AgentId {
        self.id
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the declared capabilities.
    #[must_use]
    pub const fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> AgentState {
        self.state
    }

    /// Returns the private state blob.
    #[must_use]
    pub const fn state_blob(&self) -> &Value {
        &self.state_blob
    }

    /// Returns the registration order used for tie-breaking.
    #[must_use]
    pub const fn registration_seq(&self) -> u64 {
        self.registration_seq
    }

    /// Returns the registration timestamp.
    #[must_use]
    pub const fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    /// Returns the latest change timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns whether the agent is idle and declares `capability`.
    #[must_use]
    pub fn can_accept(&self, capability: &super::Capability) -> bool {
        self.state == AgentState::Idle && self.capabilities.contains(capability)
    }

    /// Applies a lifecycle event.
    ///
    /// # Errors
    ///
    /// Returns [`AgentDomainError::InvalidTransition`] when the event is not
    /// legal from the current state. The agent is left unchanged.
    pub fn apply(
        &mut self,
        event: LifecycleEvent,
        clock: &impl Clock,
    ) -> Result<AgentTransition, AgentDomainError> {
        let from = self.state;
        let to = from
            .apply(event)
            .ok_or(AgentDomainError::InvalidTransition {
                agent_id: self.id,
                from,
                event,
            })?;
        self.state = to;
        self.touch(clock);
        Ok(AgentTransition {
            agent_id: self.id,
            from,
            to,
            event,
        })
    }

    /// Replaces the private state blob.
    pub fn replace_state_blob(&mut self, blob: Value, clock: &impl Clock) {
        self.state_blob = blob;
        self.touch(clock);
    }

    /// Forces the agent into `state`, bypassing the transition table.
    ///
    /// Used only when re-deriving transient state after a restart.
    pub(crate) fn reset_state(&mut self, state: AgentState, clock: &impl Clock) {
        self.state = state;
        self.touch(clock);
    }

    fn touch(&mut self, clock: &impl Clock) {
        self.updated_at = clock.utc();
    }
}
