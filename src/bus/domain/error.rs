//! Bus error types.

use crate::agent::domain::AgentId;
use crate::error::{Classify, ErrorClass};
use thiserror::Error;

/// Errors returned by mailbox operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    /// No open mailbox exists for the agent.
    #[error("no mailbox for agent {0}")]
    UnknownRecipient(AgentId),

    /// The mailbox is at its high-water mark.
    #[error("mailbox for agent {agent_id} is full ({limit} messages)")]
    MailboxOverflow {
        /// Mailbox owner.
        agent_id: AgentId,
        /// Configured high-water mark.
        limit: usize,
    },

    /// The mailbox was released while the caller waited.
    #[error("mailbox for agent {0} was closed")]
    MailboxClosed(AgentId),

    /// The caller's cancellation token fired.
    #[error("receive on mailbox {0} cancelled")]
    Cancelled(AgentId),

    /// Internal state lock was poisoned.
    #[error("bus state lock poisoned")]
    LockPoisoned,
}

impl Classify for BusError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::UnknownRecipient(_) => ErrorClass::Validation,
            Self::MailboxOverflow { .. } => ErrorClass::Unavailable,
            Self::MailboxClosed(_) => ErrorClass::Conflict,
            Self::Cancelled(_) => ErrorClass::Cancelled,
            Self::LockPoisoned => ErrorClass::Internal,
        }
    }

    fn entity_id(&self) -> Option<String> {
        match self {
            Self::UnknownRecipient(id)
            | Self::MailboxClosed(id)
            | Self::Cancelled(id)
            | Self::MailboxOverflow { agent_id: id, .. } => Some(id.to_string()),
            Self::LockPoisoned => None,
        }
    }
}

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;
