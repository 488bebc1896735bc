//! Error types for agent domain validation and lifecycle transitions.

use super::{AgentId, AgentState, LifecycleEvent};
use thiserror::Error;

/// Errors returned while constructing or mutating agent domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentDomainError {
    /// A capability tag is empty after trimming.
    #[error("capability must not be empty")]
    EmptyCapability,

    /// A capability tag contains characters outside `[a-z0-9_.:-]`.
    #[error("capability '{0}' contains invalid characters (only a-z, 0-9, '_', '.', ':' and '-' allowed)")]
    InvalidCapability(String),

    /// A capability tag exceeds the 100-character limit.
    #[error("capability exceeds 100 character limit: {0}")]
    CapabilityTooLong(String),

    /// Agents cannot be registered directly into a shutdown state.
    #[error("agents cannot be registered in state '{0}'")]
    InvalidInitialState(AgentState),

    /// The lifecycle event is not legal from the current state.
    #[error("agent {agent_id} cannot handle '{event}' while {from}")]
    InvalidTransition {
        /// Agent identifier.
        agent_id: AgentId,
        /// Current lifecycle state.
        from: AgentState,
        /// Rejected lifecycle event.
        event: LifecycleEvent,
    },
}

/// Error returned while parsing lifecycle states from persistence or input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown agent state: {0}")]
pub struct ParseAgentStateError(pub String);
