//! Messages, addressing, and delivery receipts.

use super::{CorrelationId, MessageId, SequenceNumber};
use crate::agent::domain::{AgentId, Capability};
use crate::task::domain::{Priority, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Originator of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Sender {
    /// Another agent.
    Agent(AgentId),
    /// The runtime itself.
    Runtime,
}

/// Destination of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Recipient {
    /// A single agent's mailbox.
    Agent(AgentId),
    /// Every mailbox open at send time.
    Broadcast,
}

/// Message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum MessagePayload {
    /// Opaque structured data exchanged between agents.
    Data {
        /// Payload body.
        body: Value,
    },
    /// The router assigned a task to the recipient.
    TaskAssigned {
        /// Assigned task.
        task_id: TaskId,
        /// Capability the task requires.
        capability: Capability,
        /// Task payload.
        payload: Value,
        /// Task priority.
        priority: Priority,
    },
    /// The recipient should stop working on a task.
    TaskCancelled {
        /// Cancelled task.
        task_id: TaskId,
    },
    /// The runtime is shutting down.
    Shutdown,
}

impl MessagePayload {
    /// Wraps opaque data.
    #[must_use]
    pub const fn data(body: Value) -> Self {
        Self::Data { body }
    }
}

/// An enqueued message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message identifier.
    pub id: MessageId,
    /// Originator.
    pub sender: Sender,
    /// Owner of the mailbox the message sits in.
    pub recipient: AgentId,
    /// Position in the recipient's mailbox.
    pub sequence: SequenceNumber,
    /// Body.
    pub payload: MessagePayload,
    /// Request this message answers, if any.
    pub correlation_id: Option<CorrelationId>,
    /// Whether this copy came from a broadcast.
    pub broadcast: bool,
    /// Enqueue timestamp.
    pub enqueued_at: DateTime<Utc>,
}

/// Parameters for [`crate::bus::services::MessageBus::send`].
#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    pub(crate) sender: Sender,
    pub(crate) recipient: Recipient,
    pub(crate) payload: MessagePayload,
    pub(crate) correlation_id: Option<CorrelationId>,
}

impl SendRequest {
    /// Creates a runtime-originated request.
    #[must_use]
    pub const fn new(recipient: Recipient, payload: MessagePayload) -> Self {
        Self {
            sender: Sender::Runtime,
            recipient,
            payload,
            correlation_id: None,
        }
    }

    /// Marks the request as sent by an agent.
    #[must_use]
    pub const fn from_agent(mut self, agent_id: AgentId) -> Self {
        self.sender = Sender::Agent(agent_id);
        self
    }

    /// Links the message to an earlier request.
    #[must_use]
    pub const fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Returns the destination.
    #[must_use]
    pub const fn recipient(&self) -> Recipient {
        self.recipient
    }
}

/// Proof that one message entered one mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Enqueued message.
    pub message_id: MessageId,
    /// Mailbox owner.
    pub recipient: AgentId,
    /// Assigned position.
    pub sequence: SequenceNumber,
}

/// Outcome of a broadcast fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReport {
    /// Copies enqueued, ordered by recipient id.
    pub delivered: Vec<Receipt>,
    /// Recipients skipped because their mailbox was at the high-water mark.
    pub overflowed: Vec<AgentId>,
}

/// Result of a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delivery {
    /// Point-to-point delivery.
    Direct(Receipt),
    /// Broadcast fan-out.
    Broadcast(BroadcastReport),
}

impl Delivery {
    /// Returns the receipt of a direct delivery.
    #[must_use]
    pub const fn receipt(&self) -> Option<&Receipt> {
        match self {
            Self::Direct(receipt) => Some(receipt),
            Self::Broadcast(_) => None,
        }
    }
}
