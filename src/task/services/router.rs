//! Task submission, assignment, and progress tracking.

use crate::agent::domain::{AgentId, Capability};
use crate::agent::services::{AgentRegistry, AgentRegistryError};
use crate::bus::domain::{BusError, MessagePayload, Recipient, SendRequest};
use crate::bus::services::MessageBus;
use crate::error::{Classify, ErrorClass};
use crate::task::domain::{Priority, Task, TaskDomainError, TaskId, TaskStatus, TaskStatusEvent};
use mockable::Clock;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Reason recorded on running tasks whose agent was removed.
const AGENT_TERMINATED_REASON: &str = "agent terminated";

/// Request payload for submitting a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitTaskRequest {
    capability: String,
    payload: Value,
    priority: Priority,
}

impl SubmitTaskRequest {
    /// Creates a normal-priority request.
    #[must_use]
    pub fn new(capability: impl Into<String>, payload: Value) -> Self {
        Self {
            capability: capability.into(),
            payload,
            priority: Priority::default(),
        }
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Service-level errors for router operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskRouterError {
    /// Domain rules rejected the request.
    #[error(transparent)]
    Domain(#[from] TaskDomainError),

    /// No task has the given identifier.
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    /// Candidate lookup failed.
    #[error(transparent)]
    Registry(#[from] AgentRegistryError),

    /// Message delivery failed for a reason other than a vanished mailbox.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Internal state lock was poisoned.
    #[error("task router lock poisoned")]
    LockPoisoned,
}

impl Classify for TaskRouterError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Domain(TaskDomainError::InvalidCapability(_)) | Self::UnknownTask(_) => {
                ErrorClass::Validation
            }
            Self::Domain(_) => ErrorClass::Conflict,
            Self::Registry(error) => error.class(),
            Self::Bus(error) => error.class(),
            Self::LockPoisoned => ErrorClass::Internal,
        }
    }

    fn entity_id(&self) -> Option<String> {
        match self {
            Self::Domain(
                TaskDomainError::AlreadyTerminal { task_id, .. }
                | TaskDomainError::InvalidTransition { task_id, .. }
                | TaskDomainError::NotAssignee { task_id, .. },
            )
            | Self::UnknownTask(task_id) => Some(task_id.to_string()),
            Self::Registry(error) => error.entity_id(),
            Self::Bus(error) => error.entity_id(),
            Self::Domain(TaskDomainError::InvalidCapability(_)) | Self::LockPoisoned => None,
        }
    }
}

/// Result type for router operations.
pub type TaskRouterResult<T> = Result<T, TaskRouterError>;

type QueueKey = (Reverse<Priority>, u64);

#[derive(Debug, Default)]
struct RouterState {
    tasks: HashMap<TaskId, Task>,
    pending: BTreeMap<QueueKey, TaskId>,
    load: HashMap<AgentId, usize>,
    next_seq: u64,
}

impl RouterState {
    fn task_mut(&mut self, task_id: TaskId) -> TaskRouterResult<&mut Task> {
        self.tasks
            .get_mut(&task_id)
            .ok_or(TaskRouterError::UnknownTask(task_id))
    }

    fn enqueue(&mut self, task: &Task) {
        self.pending.insert(queue_key(task), task.id());
    }

    fn dequeue(&mut self, task: &Task) {
        self.pending.remove(&queue_key(task));
    }

    fn add_load(&mut self, agent_id: AgentId) {
        let held = self.load.entry(agent_id).or_default();
        *held = held.saturating_add(1);
    }

    fn release_load(&mut self, agent_id: AgentId) {
        if let Some(held) = self.load.get_mut(&agent_id) {
            *held = held.saturating_sub(1);
            if *held == 0 {
                self.load.remove(&agent_id);
            }
        }
    }

    fn load_of(&self, agent_id: AgentId) -> usize {
        self.load.get(&agent_id).copied().unwrap_or_default()
    }
}

fn queue_key(task: &Task) -> QueueKey {
    (Reverse(task.priority()), task.submission_seq())
}

/// Accepts work items and delegates them to agents.
pub struct TaskRouter<C>
where
    C: Clock + Send + Sync,
{
    state: Mutex<RouterState>,
    registry: Arc<AgentRegistry<C>>,
    bus: Arc<MessageBus<C>>,
    clock: Arc<C>,
}

impl<C> TaskRouter<C>
where
    C: Clock + Send + Sync,
{
    /// Creates an empty router.
    #[must_use]
    pub fn new(registry: Arc<AgentRegistry<C>>, bus: Arc<MessageBus<C>>, clock: Arc<C>) -> Self {
        Self {
            state: Mutex::new(RouterState::default()),
            registry,
            bus,
            clock,
        }
    }

    /// Accepts a task and tries to assign it before returning.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRouterError::Domain`] when the capability is empty or
    /// malformed. No task is created in that case.
    pub fn submit(&self, request: SubmitTaskRequest) -> TaskRouterResult<Task> {
        let SubmitTaskRequest {
            capability,
            payload,
            priority,
        } = request;
        let required = Capability::new(capability).map_err(TaskDomainError::from)?;

        let mut state = self.lock_state()?;
        let seq = state.next_seq;
        state.next_seq = seq.saturating_add(1);
        let task = Task::new(required, payload, priority, seq, &*self.clock);
        let task_id = task.id();
        self.publish(task.submitted_event())?;
        tracing::info!(
            task_id = %task_id,
            capability = %task.capability(),
            priority = %priority,
            "task submitted"
        );
        state.enqueue(&task);
        state.tasks.insert(task_id, task);

        self.try_assign(&mut state, task_id)?;
        Self::snapshot(&state, task_id)
    }

    /// Retries assignment of every pending task, highest priority first.
    ///
    /// Returns the tasks that were assigned.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRouterError`] when candidate lookup or delivery fails
    /// for a reason other than a vanished mailbox.
    pub fn dispatch_pending(&self) -> TaskRouterResult<Vec<Task>> {
        let mut state = self.lock_state()?;
        let queued: Vec<TaskId> = state.pending.values().copied().collect();
        let mut assigned = Vec::new();
        for task_id in queued {
            if self.try_assign(&mut state, task_id)?.is_some() {
                assigned.push(Self::snapshot(&state, task_id)?);
            }
        }
        if !assigned.is_empty() {
            tracing::debug!(count = assigned.len(), "pending tasks dispatched");
        }
        Ok(assigned)
    }

    /// Picks the least-loaded idle agent and hands it the task.
    ///
    /// The assignment message is delivered before the task is marked
    /// `assigned`; an agent whose mailbox vanished in the meantime is skipped.
    fn try_assign(
        &self,
        state: &mut RouterState,
        task_id: TaskId,
    ) -> TaskRouterResult<Option<AgentId>> {
        let queued = state.task_mut(task_id)?;
        if queued.status() != TaskStatus::Pending {
            return Ok(None);
        }
        let capability = queued.capability().clone();
        let assignment = MessagePayload::TaskAssigned {
            task_id,
            capability: capability.clone(),
            payload: queued.payload().clone(),
            priority: queued.priority(),
        };

        let mut candidates = self.registry.idle_candidates(&capability)?;
        candidates.sort_by_key(|candidate| {
            (state.load_of(candidate.agent_id), candidate.registration_seq)
        });

        for candidate in candidates {
            let request = SendRequest::new(Recipient::Agent(candidate.agent_id), assignment.clone());
            match self.bus.send(request) {
                Ok(_) => {
                    let claimed = state.task_mut(task_id)?;
                    let event = claimed.assign(candidate.agent_id, &*self.clock)?;
                    let key = queue_key(claimed);
                    state.pending.remove(&key);
                    state.add_load(candidate.agent_id);
                    self.publish(event)?;
                    tracing::debug!(
                        task_id = %task_id,
                        agent_id = %candidate.agent_id,
                        "task assigned"
                    );
                    return Ok(Some(candidate.agent_id));
                }
                Err(
                    error @ (BusError::UnknownRecipient(_)
                    | BusError::MailboxClosed(_)
                    | BusError::MailboxOverflow { .. }),
                ) => {
                    tracing::warn!(
                        task_id = %task_id,
                        agent_id = %candidate.agent_id,
                        error = %error,
                        "assignment delivery failed, trying next candidate"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }
        Ok(None)
    }

    /// Withdraws a task.
    ///
    /// Pending and assigned tasks are cancelled outright. A running task is
    /// marked cancelled and its agent receives a cancellation message, but the
    /// agent must stop on its own.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRouterError::UnknownTask`] for an unknown id and a
    /// [`TaskDomainError::AlreadyTerminal`] conflict when the task already
    /// finished.
    pub fn cancel(&self, task_id: TaskId) -> TaskRouterResult<Task> {
        let mut state = self.lock_state()?;
        let task = state.task_mut(task_id)?;
        let holder = task.assignee();
        let event = task.cancel(&*self.clock)?;
        let snapshot = task.clone();
        state.dequeue(&snapshot);
        self.publish(event)?;

        if let Some(agent_id) = holder {
            state.release_load(agent_id);
            let notice = SendRequest::new(
                Recipient::Agent(agent_id),
                MessagePayload::TaskCancelled { task_id },
            );
            if let Err(error) = self.bus.send(notice) {
                tracing::warn!(
                    task_id = %task_id,
                    agent_id = %agent_id,
                    error = %error,
                    "cancellation notice not delivered"
                );
            }
        }
        tracing::info!(task_id = %task_id, "task cancelled");
        Ok(snapshot)
    }

    /// Records that the assignee started the task.
    ///
    /// # Errors
    ///
    /// Returns a conflict when `agent_id` is not the assignee or the task is
    /// not `assigned`.
    pub fn start(&self, task_id: TaskId, agent_id: AgentId) -> TaskRouterResult<Task> {
        self.report(task_id, |task, clock| task.start(agent_id, clock))
    }

    /// Records the assignee's result.
    ///
    /// # Errors
    ///
    /// Returns a conflict when `agent_id` is not the assignee or the task is
    /// already terminal.
    pub fn complete(
        &self,
        task_id: TaskId,
        agent_id: AgentId,
        result: Value,
    ) -> TaskRouterResult<Task> {
        self.report(task_id, |task, clock| task.complete(agent_id, result, clock))
    }

    /// Records the assignee's failure.
    ///
    /// # Errors
    ///
    /// Returns a conflict when `agent_id` is not the assignee or the task is
    /// already terminal.
    pub fn fail(
        &self,
        task_id: TaskId,
        agent_id: AgentId,
        reason: impl Into<String>,
    ) -> TaskRouterResult<Task> {
        self.report(task_id, |task, clock| task.fail(agent_id, reason, clock))
    }

    fn report<F>(&self, task_id: TaskId, apply: F) -> TaskRouterResult<Task>
    where
        F: FnOnce(&mut Task, &C) -> Result<TaskStatusEvent, TaskDomainError>,
    {
        let mut state = self.lock_state()?;
        let task = state.task_mut(task_id)?;
        let event = apply(task, &*self.clock)?;
        let snapshot = task.clone();
        if snapshot.status().is_terminal()
            && let Some(agent_id) = snapshot.assignee()
        {
            state.release_load(agent_id);
        }
        self.publish(event)?;
        tracing::debug!(task_id = %task_id, status = %snapshot.status(), "task progress reported");
        Ok(snapshot)
    }

    /// Detaches every task held by a removed agent.
    ///
    /// Assigned tasks go back to the queue and are redispatched; running
    /// tasks fail because their work is lost. Returns every task touched.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRouterError`] when redispatch fails.
    pub fn release_agent(&self, agent_id: AgentId) -> TaskRouterResult<Vec<Task>> {
        let mut touched = {
            let mut state = self.lock_state()?;
            let held: Vec<TaskId> = state
                .tasks
                .values()
                .filter(|task| task.assignee() == Some(agent_id) && task.status().is_held())
                .map(Task::id)
                .collect();

            let mut released = Vec::with_capacity(held.len());
            for task_id in held {
                let task = state.task_mut(task_id)?;
                let event = if task.status() == TaskStatus::Running {
                    task.fail(agent_id, AGENT_TERMINATED_REASON, &*self.clock)?
                } else {
                    task.requeue(&*self.clock)?
                };
                let snapshot = task.clone();
                if snapshot.status() == TaskStatus::Pending {
                    state.enqueue(&snapshot);
                }
                self.publish(event)?;
                released.push(snapshot);
            }
            state.load.remove(&agent_id);
            released
        };

        let redispatched = self.dispatch_pending()?;
        touched.retain(|task| {
            !redispatched
                .iter()
                .any(|assigned| assigned.id() == task.id())
        });
        touched.extend(redispatched);
        if !touched.is_empty() {
            tracing::info!(agent_id = %agent_id, count = touched.len(), "agent tasks released");
        }
        Ok(touched)
    }

    /// Returns a snapshot of one task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRouterError::UnknownTask`] when the id is absent.
    pub fn get(&self, task_id: TaskId) -> TaskRouterResult<Task> {
        let state = self.lock_state()?;
        Self::snapshot(&state, task_id)
    }

    /// Lists tasks in submission order, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRouterError::LockPoisoned`] when state is poisoned.
    pub fn list(&self, status_filter: Option<TaskStatus>) -> TaskRouterResult<Vec<Task>> {
        let state = self.lock_state()?;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|task| status_filter.is_none_or(|wanted| task.status() == wanted))
            .cloned()
            .collect();
        tasks.sort_by_key(Task::submission_seq);
        Ok(tasks)
    }

    /// Returns the number of assigned and running tasks held by an agent.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRouterError::LockPoisoned`] when state is poisoned.
    pub fn load(&self, agent_id: AgentId) -> TaskRouterResult<usize> {
        Ok(self.lock_state()?.load_of(agent_id))
    }

    /// Reloads persisted tasks after a restart.
    ///
    /// Terminal tasks are skipped. Assigned and running tasks are reset to
    /// `pending` since no agent work survives a restart. Call
    /// [`Self::dispatch_pending`] once agents are restored. Returns every
    /// restored task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRouterError::LockPoisoned`] when state is poisoned.
    pub fn restore(&self, tasks: Vec<Task>) -> TaskRouterResult<Vec<Task>> {
        let mut state = self.lock_state()?;
        let mut restored = Vec::with_capacity(tasks.len());
        for mut task in tasks {
            if task.status().is_terminal() {
                continue;
            }
            if task.status().is_held() {
                let event = task.requeue(&*self.clock)?;
                self.publish(event)?;
            }
            state.next_seq = state
                .next_seq
                .max(task.submission_seq().saturating_add(1));
            state.enqueue(&task);
            tracing::debug!(task_id = %task.id(), "task restored");
            state.tasks.insert(task.id(), task.clone());
            restored.push(task);
        }
        Ok(restored)
    }

    fn snapshot(state: &RouterState, task_id: TaskId) -> TaskRouterResult<Task> {
        state
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or(TaskRouterError::UnknownTask(task_id))
    }

    fn publish(&self, event: TaskStatusEvent) -> TaskRouterResult<()> {
        self.bus.control().tasks().publish(event, self.clock.utc())?;
        Ok(())
    }

    fn lock_state(&self) -> TaskRouterResult<MutexGuard<'_, RouterState>> {
        self.state.lock().map_err(|_| TaskRouterError::LockPoisoned)
    }
}
