//! Error types for task validation and status transitions.

use super::{TaskId, TaskStatus};
use crate::agent::domain::{AgentDomainError, AgentId};
use thiserror::Error;

/// Errors returned while constructing or mutating tasks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskDomainError {
    /// The required capability is missing or malformed.
    #[error("invalid required capability: {0}")]
    InvalidCapability(#[from] AgentDomainError),

    /// The task already reached a terminal status.
    #[error("task {task_id} is already {status}")]
    AlreadyTerminal {
        /// Task identifier.
        task_id: TaskId,
        /// Terminal status.
        status: TaskStatus,
    },

    /// The status change is not permitted from the current status.
    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Task identifier.
        task_id: TaskId,
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },

    /// A progress report came from an agent that does not hold the task.
    #[error("agent {agent_id} is not assigned to task {task_id}")]
    NotAssignee {
        /// Task identifier.
        task_id: TaskId,
        /// Reporting agent.
        agent_id: AgentId,
    },
}

/// Error returned while parsing task statuses from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown task status: {0}")]
pub struct ParseTaskStatusError(pub String);
