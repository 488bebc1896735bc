//! Task status machine and status events.

use super::{ParseTaskStatusError, TaskId};
use crate::agent::domain::AgentId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Routing status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for an eligible agent.
    Pending,
    /// Handed to an agent that has not started it.
    Assigned,
    /// Reported as started by its agent.
    Running,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
    /// Withdrawn before completion.
    Cancelled,
}

impl TaskStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Assigned,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns whether the task counts towards its assignee's load.
    #[must_use]
    pub const fn is_held(self) -> bool {
        matches!(self, Self::Assigned | Self::Running)
    }

    /// Returns whether moving to `target` is permitted.
    ///
    /// `assigned` and `running` may fall back to `pending` only when the
    /// holder disappears or the runtime restarts.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Assigned | Self::Cancelled)
                | (
                    Self::Assigned,
                    Self::Running | Self::Completed | Self::Failed | Self::Cancelled | Self::Pending
                )
                | (
                    Self::Running,
                    Self::Completed | Self::Failed | Self::Cancelled | Self::Pending
                )
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for TaskStatus {
    type Error = ParseTaskStatusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| ParseTaskStatusError(value.to_owned()))
    }
}

/// Terminal result recorded on a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TaskOutcome {
    /// The agent reported a result.
    Success {
        /// Result payload.
        result: Value,
    },
    /// The agent, or the runtime on its behalf, reported an error.
    Failure {
        /// Error description.
        reason: String,
    },
    /// The task was withdrawn.
    Cancelled {
        /// Whether the agent had already started and was only notified.
        advisory: bool,
    },
}

/// Status change published on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusEvent {
    /// Task that changed.
    pub task_id: TaskId,
    /// Previous status, absent on submission.
    pub from: Option<TaskStatus>,
    /// New status.
    pub to: TaskStatus,
    /// Holder after the change, if any.
    pub assignee: Option<AgentId>,
}
