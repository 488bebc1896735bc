//! Task aggregate root.

use super::{Priority, TaskDomainError, TaskId, TaskOutcome, TaskStatus, TaskStatusEvent};
use crate::agent::domain::{AgentId, Capability};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A unit of work routed to one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    capability: Capability,
    payload: Value,
    priority: Priority,
    status: TaskStatus,
    assignee: Option<AgentId>,
    outcome: Option<TaskOutcome>,
    submission_seq: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Parameter object for reconstructing a persisted task.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedTaskData {
    /// Persisted identifier.
    pub id: TaskId,
    /// Persisted required capability.
    pub capability: Capability,
    /// Persisted payload.
    pub payload: Value,
    /// Persisted priority.
    pub priority: Priority,
    /// Persisted status.
    pub status: TaskStatus,
    /// Persisted assignee.
    pub assignee: Option<AgentId>,
    /// Persisted terminal outcome.
    pub outcome: Option<TaskOutcome>,
    /// Persisted submission order.
    pub submission_seq: u64,
    /// Persisted creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Persisted latest change timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Creates a pending task.
    #[must_use]
    pub fn new(
        capability: Capability,
        payload: Value,
        priority: Priority,
        submission_seq: u64,
        clock: &impl Clock,
    ) -> Self {
        let timestamp = clock.utc();
        Self {
            id: TaskId::new(),
            capability,
            payload,
            priority,
            status: TaskStatus::Pending,
            assignee: None,
            outcome: None,
            submission_seq,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Reconstructs a task from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedTaskData) -> Self {
        Self {
            id: data.id,
            capability: data.capability,
            payload: data.payload,
            priority: data.priority,
            status: data.status,
            assignee: data.assignee,
            outcome: data.outcome,
            submission_seq: data.submission_seq,
            created_at: data.created_at,
            updated_at: data.updated_at,
        }
    }

    /// Returns the task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the required capability.
    #[must_use]
    pub const fn capability(&self) -> &Capability {
        &self.capability
    }

    /// Returns the opaque payload.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Returns the priority.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns the current status.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    /// Returns the agent holding the task, if any.
    #[must_use]
    pub const fn assignee(&self) -> Option<AgentId> {
        self.assignee
    }

    /// Returns the terminal outcome, if any.
    #[must_use]
    pub const fn outcome(&self) -> Option<&TaskOutcome> {
        self.outcome.as_ref()
    }

    /// Returns the submission order.
    #[must_use]
    pub const fn submission_seq(&self) -> u64 {
        self.submission_seq
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the latest change timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the event describing the task's submission.
    #[must_use]
    pub const fn submitted_event(&self) -> TaskStatusEvent {
        TaskStatusEvent {
            task_id: self.id,
            from: None,
            to: self.status,
            assignee: self.assignee,
        }
    }

    /// Hands the pending task to `agent_id`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError`] when the task is not pending.
    pub fn assign(
        &mut self,
        agent_id: AgentId,
        clock: &impl Clock,
    ) -> Result<TaskStatusEvent, TaskDomainError> {
        self.ensure_status(TaskStatus::Assigned)?;
        self.assignee = Some(agent_id);
        Ok(self.move_to(TaskStatus::Assigned, clock))
    }

    /// Records that the assignee started work.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::NotAssignee`] for any other agent, or a
    /// transition error when the task is not `assigned`.
    pub fn start(
        &mut self,
        agent_id: AgentId,
        clock: &impl Clock,
    ) -> Result<TaskStatusEvent, TaskDomainError> {
        self.ensure_status(TaskStatus::Running)?;
        self.ensure_assignee(agent_id)?;
        Ok(self.move_to(TaskStatus::Running, clock))
    }

    /// Records the assignee's result.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::NotAssignee`] for any other agent, or
    /// [`TaskDomainError::AlreadyTerminal`] when the task already finished.
    pub fn complete(
        &mut self,
        agent_id: AgentId,
        result: Value,
        clock: &impl Clock,
    ) -> Result<TaskStatusEvent, TaskDomainError> {
        self.ensure_status(TaskStatus::Completed)?;
        self.ensure_assignee(agent_id)?;
        self.outcome = Some(TaskOutcome::Success { result });
        Ok(self.move_to(TaskStatus::Completed, clock))
    }

    /// Records the assignee's failure.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::NotAssignee`] for any other agent, or
    /// [`TaskDomainError::AlreadyTerminal`] when the task already finished.
    pub fn fail(
        &mut self,
        agent_id: AgentId,
        reason: impl Into<String>,
        clock: &impl Clock,
    ) -> Result<TaskStatusEvent, TaskDomainError> {
        self.ensure_status(TaskStatus::Failed)?;
        self.ensure_assignee(agent_id)?;
        self.outcome = Some(TaskOutcome::Failure {
            reason: reason.into(),
        });
        Ok(self.move_to(TaskStatus::Failed, clock))
    }

    /// Withdraws the task.
    ///
    /// Cancelling a running task is advisory: the status becomes `cancelled`
    /// but the assignee must stop on its own.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::AlreadyTerminal`] when the task already
    /// finished.
    pub fn cancel(&mut self, clock: &impl Clock) -> Result<TaskStatusEvent, TaskDomainError> {
        self.ensure_status(TaskStatus::Cancelled)?;
        let advisory = self.status == TaskStatus::Running;
        self.outcome = Some(TaskOutcome::Cancelled { advisory });
        Ok(self.move_to(TaskStatus::Cancelled, clock))
    }

    /// Returns a held task to the queue and clears its assignee.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError`] when the task is neither `assigned` nor
    /// `running`.
    pub fn requeue(&mut self, clock: &impl Clock) -> Result<TaskStatusEvent, TaskDomainError> {
        self.ensure_status(TaskStatus::Pending)?;
        self.assignee = None;
        Ok(self.move_to(TaskStatus::Pending, clock))
    }

    fn ensure_status(&self, target: TaskStatus) -> Result<(), TaskDomainError> {
        if self.status.is_terminal() {
            return Err(TaskDomainError::AlreadyTerminal {
                task_id: self.id,
                status: self.status,
            });
        }
        if !self.status.can_transition_to(target) {
            return Err(TaskDomainError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to: target,
            });
        }
        Ok(())
    }

    fn ensure_assignee(&self, agent_id: AgentId) -> Result<(), TaskDomainError> {
        if self.assignee == Some(agent_id) {
            Ok(())
        } else {
            Err(TaskDomainError::NotAssignee {
                task_id: self.id,
                agent_id,
            })
        }
    }

    fn move_to(&mut self, target: TaskStatus, clock: &impl Clock) -> TaskStatusEvent {
        let from = self.status;
        self.status = target;
        self.updated_at = clock.utc();
        TaskStatusEvent {
            task_id: self.id,
            from: Some(from),
            to: target,
            assignee: self.assignee,
        }
    }
}
