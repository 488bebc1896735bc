//! Agent registration, lifecycle transitions, and discovery.

use crate::agent::domain::{
    Agent, AgentDomainError, AgentId, AgentLifecycleEvent, AgentState, AgentTransition,
    Capability, CapabilitySet, LifecycleEvent,
};
use crate::bus::domain::BusError;
use crate::bus::services::MessageBus;
use crate::config::RegistrySettings;
use crate::error::{Classify, ErrorClass};
use mockable::Clock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Request payload for registering a new agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterAgentRequest {
    capabilities: Vec<String>,
    initial_state: AgentState,
    name: Option<String>,
}

impl RegisterAgentRequest {
    /// Creates a request for an agent starting in `created`.
    #[must_use]
    pub fn new<I, S>(capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            initial_state: AgentState::Created,
            name: None,
        }
    }

    /// Sets the state the agent starts in.
    #[must_use]
    pub const fn with_initial_state(mut self, state: AgentState) -> Self {
        self.initial_state = state;
        self
    }

    /// Sets a display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Service-level errors for registry operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentRegistryError {
    /// Domain validation or transition rules rejected the request.
    #[error(transparent)]
    Domain(#[from] AgentDomainError),

    /// No agent has the given identifier.
    #[error("unknown agent: {0}")]
    UnknownAgent(AgentId),

    /// Another live agent already declares the capability.
    #[error("capability '{capability}' is already held by agent {holder}")]
    DuplicateCapabilityConflict {
        /// Contested capability.
        capability: Capability,
        /// Live agent holding it.
        holder: AgentId,
    },

    /// The agent is terminated and can no longer be mutated.
    #[error("agent {0} is terminated")]
    Terminated(AgentId),

    /// Mailbox management failed.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Internal state lock was poisoned.
    #[error("agent registry lock poisoned")]
    LockPoisoned,
}

impl Classify for AgentRegistryError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Domain(AgentDomainError::InvalidTransition { .. })
            | Self::DuplicateCapabilityConflict { .. }
            | Self::Terminated(_) => ErrorClass::Conflict,
            Self::Domain(_) | Self::UnknownAgent(_) => ErrorClass::Validation,
            Self::Bus(error) => error.class(),
            Self::LockPoisoned => ErrorClass::Internal,
        }
    }

    fn entity_id(&self) -> Option<String> {
        match self {
            Self::Domain(AgentDomainError::InvalidTransition { agent_id, .. })
            | Self::UnknownAgent(agent_id)
            | Self::Terminated(agent_id) => Some(agent_id.to_string()),
            Self::DuplicateCapabilityConflict { holder, .. } => Some(holder.to_string()),
            Self::Bus(error) => error.entity_id(),
            Self::Domain(_) | Self::LockPoisoned => None,
        }
    }
}

/// Result type for registry operations.
pub type AgentRegistryResult<T> = Result<T, AgentRegistryError>;

/// An idle agent able to take a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleCandidate {
    /// Candidate agent.
    pub agent_id: AgentId,
    /// Registration order used to break load ties.
    pub registration_seq: u64,
}

#[derive(Debug, Default)]
struct RegistryState {
    agents: HashMap<AgentId, Agent>,
    next_seq: u64,
}

/// Owns the canonical state of every agent instance.
///
/// All mutations happen under one write lock and publish their lifecycle
/// event before the lock is released, so event order always matches state
/// order.
pub struct AgentRegistry<C>
where
    C: Clock + Send + Sync,
{
    state: RwLock<RegistryState>,
    bus: Arc<MessageBus<C>>,
    unique_capabilities: bool,
    clock: Arc<C>,
}

impl<C> AgentRegistry<C>
where
    C: Clock + Send + Sync,
{
    /// Creates an empty registry that opens mailboxes on `bus`.
    #[must_use]
    pub fn new(settings: &RegistrySettings, bus: Arc<MessageBus<C>>, clock: Arc<C>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            bus,
            unique_capabilities: settings.unique_capabilities,
            clock,
        }
    }

    /// Registers a new agent and opens its mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`AgentRegistryError::Domain`] when a capability or the
    /// initial state is invalid, and
    /// [`AgentRegistryError::DuplicateCapabilityConflict`] when uniqueness is
    /// enforced and a live agent already declares one of the capabilities.
    pub fn register(&self, request: RegisterAgentRequest) -> AgentRegistryResult<Agent> {
        let RegisterAgentRequest {
            capabilities,
            initial_state,
            name,
        } = request;

        let capability_set = CapabilitySet::parse(capabilities)?;
        if !initial_state.is_valid_initial() {
            return Err(AgentDomainError::InvalidInitialState(initial_state).into());
        }

        let mut state = self.write_state()?;
        if self.unique_capabilities {
            Self::check_unique(&state, &capability_set)?;
        }

        let seq = state.next_seq;
        state.next_seq = seq.saturating_add(1);
        let base = Agent::new(capability_set, initial_state, seq, &*self.clock);
        let agent = name.into_iter().fold(base, Agent::with_name);

        self.bus.open_mailbox(agent.id())?;
        state.agents.insert(agent.id(), agent.clone());
        self.bus.control().agents().publish(
            AgentLifecycleEvent::registered(agent.id(), initial_state),
            self.clock.utc(),
        )?;
        tracing::info!(
            agent_id = %agent.id(),
            state = %initial_state,
            capabilities = agent.capabilities().len(),
            "agent registered"
        );
        Ok(agent)
    }

    fn check_unique(state: &RegistryState, requested: &CapabilitySet) -> AgentRegistryResult<()> {
        let conflict = state
            .agents
            .values()
            .filter(|agent| !agent.state().is_terminated())
            .find_map(|agent| {
                agent
                    .capabilities()
                    .first_shared(requested)
                    .map(|capability| (capability.clone(), agent.id()))
            });
        conflict.map_or(Ok(()), |(capability, holder)| {
            Err(AgentRegistryError::DuplicateCapabilityConflict { capability, holder })
        })
    }

    /// Applies a lifecycle event and returns the accepted transition.
    ///
    /// Entering `terminated` releases the agent's mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`AgentRegistryError::UnknownAgent`] when the id is absent and
    /// [`AgentRegistryError::Domain`] with
    /// [`AgentDomainError::InvalidTransition`] when the event is not legal
    /// from the current state.
    pub fn transition(
        &self,
        agent_id: AgentId,
        event: LifecycleEvent,
    ) -> AgentRegistryResult<AgentTransition> {
        let mut state = self.write_state()?;
        let agent = state
            .agents
            .get_mut(&agent_id)
            .ok_or(AgentRegistryError::UnknownAgent(agent_id))?;
        let transition = agent.apply(event, &*self.clock)?;
        self.after_transition(transition)?;
        Ok(transition)
    }

    fn after_transition(&self, transition: AgentTransition) -> AgentRegistryResult<()> {
        if transition.to.is_terminated() {
            self.bus.close_mailbox(transition.agent_id)?;
        }
        self.bus
            .control()
            .agents()
            .publish(transition.into(), self.clock.utc())?;
        tracing::debug!(
            agent_id = %transition.agent_id,
            from = %transition.from,
            to = %transition.to,
            event = %transition.event,
            "agent transitioned"
        );
        Ok(())
    }

    /// Drives the agent through `stopping -> terminated` and releases its
    /// mailbox.
    ///
    /// Removing an already terminated agent succeeds without effect. The
    /// terminated record is kept so later lookups do not report an unknown
    /// agent; its private state is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`AgentRegistryError::UnknownAgent`] when the id was never
    /// registered.
    pub fn remove(&self, agent_id: AgentId) -> AgentRegistryResult<Vec<AgentTransition>> {
        let mut state = self.write_state()?;
        let agent = state
            .agents
            .get_mut(&agent_id)
            .ok_or(AgentRegistryError::UnknownAgent(agent_id))?;

        let mut transitions = Vec::with_capacity(2);
        if agent.state() != AgentState::Stopping && !agent.state().is_terminated() {
            transitions.push(agent.apply(LifecycleEvent::Stop, &*self.clock)?);
        }
        if agent.state() == AgentState::Stopping {
            transitions.push(agent.apply(LifecycleEvent::Terminate, &*self.clock)?);
            agent.replace_state_blob(Value::Null, &*self.clock);
        }

        for transition in &transitions {
            self.after_transition(*transition)?;
        }
        if !transitions.is_empty() {
            tracing::info!(agent_id = %agent_id, "agent removed");
        }
        Ok(transitions)
    }

    /// Returns a snapshot of one agent.
    ///
    /// # Errors
    ///
    /// Returns [`AgentRegistryError::UnknownAgent`] when the id is absent.
    pub fn get(&self, agent_id: AgentId) -> AgentRegistryResult<Agent> {
        self.read_state()?
            .agents
            .get(&agent_id)
            .cloned()
            .ok_or(AgentRegistryError::UnknownAgent(agent_id))
    }

    /// Lists agents in registration order, optionally filtered by state.
    ///
    /// # Errors
    ///
    /// Returns [`AgentRegistryError::LockPoisoned`] when state is poisoned.
    pub fn list(&self, state_filter: Option<AgentState>) -> AgentRegistryResult<Vec<Agent>> {
        let state = self.read_state()?;
        let mut agents: Vec<Agent> = state
            .agents
            .values()
            .filter(|agent| state_filter.is_none_or(|wanted| agent.state() == wanted))
            .cloned()
            .collect();
        agents.sort_by_key(Agent::registration_seq);
        Ok(agents)
    }

    /// Returns idle agents declaring `capability`, earliest registration
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`AgentRegistryError::LockPoisoned`] when state is poisoned.
    pub fn idle_candidates(
        &self,
        capability: &Capability,
    ) -> AgentRegistryResult<Vec<IdleCandidate>> {
        let state = self.read_state()?;
        let mut candidates: Vec<IdleCandidate> = state
            .agents
            .values()
            .filter(|agent| agent.can_accept(capability))
            .map(|agent| IdleCandidate {
                agent_id: agent.id(),
                registration_seq: agent.registration_seq(),
            })
            .collect();
        candidates.sort_by_key(|candidate| candidate.registration_seq);
        Ok(candidates)
    }

    /// Replaces an agent's private state blob.
    ///
    /// # Errors
    ///
    /// Returns [`AgentRegistryError::UnknownAgent`] when the id is absent and
    /// [`AgentRegistryError::Terminated`] when the agent is terminated.
    pub fn update_state_blob(&self, agent_id: AgentId, blob: Value) -> AgentRegistryResult<Agent> {
        let mut state = self.write_state()?;
        let agent = state
            .agents
            .get_mut(&agent_id)
            .ok_or(AgentRegistryError::UnknownAgent(agent_id))?;
        if agent.state().is_terminated() {
            return Err(AgentRegistryError::Terminated(agent_id));
        }
        agent.replace_state_blob(blob, &*self.clock);
        Ok(agent.clone())
    }

    /// Reloads persisted agents after a restart.
    ///
    /// Terminated records are skipped. Agents persisted as `running` come
    /// back `idle` and agents caught in `stopping` are terminated, since no
    /// work survives the restart. Mailboxes are reopened for the survivors.
    /// Returns every restored agent, including the ones whose state changed.
    ///
    /// # Errors
    ///
    /// Returns [`AgentRegistryError::LockPoisoned`] or a bus error when
    /// mailboxes cannot be reopened.
    pub fn restore(&self, agents: Vec<Agent>) -> AgentRegistryResult<Vec<Agent>> {
        let mut state = self.write_state()?;
        let mut restored = Vec::with_capacity(agents.len());
        for mut agent in agents {
            match agent.state() {
                AgentState::Terminated => continue,
                AgentState::Running => agent.reset_state(AgentState::Idle, &*self.clock),
                AgentState::Stopping => {
                    agent.reset_state(AgentState::Terminated, &*self.clock);
                    agent.replace_state_blob(Value::Null, &*self.clock);
                }
                _ => {}
            }
            if !agent.state().is_terminated() {
                self.bus.open_mailbox(agent.id())?;
            }
            state.next_seq = state
                .next_seq
                .max(agent.registration_seq().saturating_add(1));
            state.agents.insert(agent.id(), agent.clone());
            tracing::debug!(agent_id = %agent.id(), state = %agent.state(), "agent restored");
            restored.push(agent);
        }
        Ok(restored)
    }

    fn read_state(&self) -> AgentRegistryResult<std::sync::RwLockReadGuard<'_, RegistryState>> {
        self.state.read().map_err(|_| AgentRegistryError::LockPoisoned)
    }

    fn write_state(&self) -> AgentRegistryResult<std::sync::RwLockWriteGuard<'_, RegistryState>> {
        self.state.write().map_err(|_| AgentRegistryError::LockPoisoned)
    }
}
