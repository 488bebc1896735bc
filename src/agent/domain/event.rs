//! Lifecycle change records.

use super::{AgentId, AgentState, LifecycleEvent};
use serde::{Deserialize, Serialize};

/// Outcome of one accepted lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTransition {
    /// Agent that moved.
    pub agent_id: AgentId,
    /// State before the event.
    pub from: AgentState,
    /// State after the event.
    pub to: AgentState,
    /// Event that caused the move.
    pub event: LifecycleEvent,
}

/// Lifecycle event published on the control channel.
///
/// `from` and `event` are `None` for the registration itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentLifecycleEvent {
    /// Agent that moved.
    pub agent_id: AgentId,
    /// Previous state, absent on registration.
    pub from: Option<AgentState>,
    /// New state.
    pub to: AgentState,
    /// Triggering event, absent on registration.
    pub event: Option<LifecycleEvent>,
}

impl AgentLifecycleEvent {
    /// Builds the event announcing a new registration.
    #[must_use]
    pub const fn registered(agent_id: AgentId, initial_state: AgentState) -> Self {
        Self {
            agent_id,
            from: None,
            to: initial_state,
            event: None,
        }
    }
}

impl From<AgentTransition> for AgentLifecycleEvent {
    fn from(transition: AgentTransition) -> Self {
        Self {
            agent_id: transition.agent_id,
            from: Some(transition.from),
            to: transition.to,
            event: Some(transition.event),
        }
    }
}
