//! The runtime's public operations.
//!
//! Control-path operations (`submit_task`, `send_message`,
//! `transition_agent`, ...) are synchronous. Only operations that wait on a
//! mailbox, a tool connection or a model backend are `async`, and each takes
//! a [`CancellationToken`].

use super::builder::OrchestratorBuilder;
use crate::agent::domain::{
    Agent, AgentId, AgentLifecycleEvent, AgentState, AgentTransition, LifecycleEvent,
};
use crate::agent::services::{AgentRegistry, RegisterAgentRequest};
use crate::bus::domain::{Delivery, Message, MessagePayload, Recipient, SendRequest};
use crate::bus::services::{MessageBus, SequencedEvent};
use crate::cancel::CancellationToken;
use crate::config::RuntimeSettings;
use crate::error::{RuntimeError, RuntimeResult};
use crate::persistence::domain::{DocumentKey, EntityRef};
use crate::persistence::ports::DocumentStore;
use crate::persistence::services::{Journal, JournalReport, load_state};
use crate::provider::domain::{BackendId, CompletionRequest, EmbeddingRequest, GenerateRequest};
use crate::provider::ports::{BackendHealth, ModelBackend};
use crate::provider::services::{Embedded, Generation, ModelGateway};
use crate::task::domain::{Task, TaskId, TaskStatus, TaskStatusEvent};
use crate::task::services::{SubmitTaskRequest, TaskRouter};
use crate::tool_protocol::domain::{
    ConnectionId, ConnectionState, ConnectionStateEvent, ServerAddress, ToolCallResult,
    ToolConnection,
};
use crate::tool_protocol::services::{InvokeRequest, ToolClientManager};
use mockable::Clock;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

/// What [`Orchestrator::recover`] brought back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Agents restored in a live state.
    pub agents: usize,
    /// Non-terminal tasks restored.
    pub tasks: usize,
    /// Restored tasks assigned again during recovery.
    pub reassigned: usize,
    /// Connections re-established.
    pub connections_ready: usize,
    /// Connections left `disconnected`.
    pub connections_down: usize,
    /// Documents that could not be decoded.
    pub skipped: Vec<DocumentKey>,
}

/// Composition root exposing the runtime to API and UI layers.
pub struct Orchestrator<C>
where
    C: Clock + Send + Sync + 'static,
{
    pub(super) bus: Arc<MessageBus<C>>,
    pub(super) registry: Arc<AgentRegistry<C>>,
    pub(super) router: Arc<TaskRouter<C>>,
    pub(super) tools: Arc<ToolClientManager<C>>,
    pub(super) providers: Arc<ModelGateway>,
    pub(super) store: Option<Arc<dyn DocumentStore>>,
    pub(super) journal: Option<Journal>,
}

impl<C> Orchestrator<C>
where
    C: Clock + Send + Sync + 'static,
{
    /// Starts building an orchestrator.
    #[must_use]
    pub fn builder(settings: RuntimeSettings, clock: Arc<C>) -> OrchestratorBuilder<C> {
        OrchestratorBuilder::new(settings, clock)
    }

    fn record(&self, entity: EntityRef) {
        if let Some(journal) = &self.journal {
            journal.record(entity);
        }
    }

    fn record_tasks(&self, tasks: &[Task]) {
        for task in tasks {
            self.record(EntityRef::Task(task.id()));
        }
    }

    fn redispatch(&self) -> RuntimeResult<Vec<Task>> {
        let assigned = self.router.dispatch_pending()?;
        self.record_tasks(&assigned);
        Ok(assigned)
    }

    // Agents

    /// Registers an agent. An agent registered straight into `idle` picks
    /// up pending work immediately.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed capabilities and a conflict
    /// when capability uniqueness is enforced and violated.
    pub fn register_agent(&self, request: RegisterAgentRequest) -> RuntimeResult<Agent> {
        let agent = self.registry.register(request)?;
        self.record(EntityRef::Agent(agent.id()));
        if agent.state() == AgentState::Idle {
            self.redispatch()?;
        }
        Ok(agent)
    }

    /// Applies a lifecycle event.
    ///
    /// Reaching `idle` redispatches pending tasks before returning. Reaching
    /// `terminated` releases the agent's tasks.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown agent and a conflict when
    /// the event is illegal from the current state.
    pub fn transition_agent(
        &self,
        agent_id: AgentId,
        event: LifecycleEvent,
    ) -> RuntimeResult<AgentTransition> {
        let transition = self.registry.transition(agent_id, event)?;
        self.record(EntityRef::Agent(agent_id));
        if transition.to == AgentState::Idle {
            self.redispatch()?;
        } else if transition.to.is_terminated() {
            let released = self.router.release_agent(agent_id)?;
            self.record_tasks(&released);
        }
        Ok(transition)
    }

    /// Stops and terminates an agent, releasing its mailbox and tasks.
    /// Removing a terminated agent is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the agent was never registered.
    pub fn remove_agent(&self, agent_id: AgentId) -> RuntimeResult<Vec<AgentTransition>> {
        let transitions = self.registry.remove(agent_id)?;
        if !transitions.is_empty() {
            self.record(EntityRef::Agent(agent_id));
            let released = self.router.release_agent(agent_id)?;
            self.record_tasks(&released);
        }
        Ok(transitions)
    }

    /// Replaces an agent's private state blob.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown agent and a conflict for a
    /// terminated one.
    pub fn update_agent_state(&self, agent_id: AgentId, blob: Value) -> RuntimeResult<Agent> {
        let agent = self.registry.update_state_blob(agent_id, blob)?;
        self.record(EntityRef::Agent(agent_id));
        Ok(agent)
    }

    /// Returns one agent.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown agent.
    pub fn agent(&self, agent_id: AgentId) -> RuntimeResult<Agent> {
        self.registry.get(agent_id).map_err(RuntimeError::from)
    }

    /// Lists agents in registration order.
    ///
    /// # Errors
    ///
    /// Returns an internal error when registry state is poisoned.
    pub fn list_agents(&self, state_filter: Option<AgentState>) -> RuntimeResult<Vec<Agent>> {
        self.registry.list(state_filter).map_err(RuntimeError::from)
    }

    // Tasks

    /// Submits a task. When an eligible agent is idle the returned task is
    /// already `assigned`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty or malformed capability.
    pub fn submit_task(&self, request: SubmitTaskRequest) -> RuntimeResult<Task> {
        let task = self.router.submit(request)?;
        self.record(EntityRef::Task(task.id()));
        Ok(task)
    }

    /// Cancels a task; advisory once it is running.
    ///
    /// # Errors
    ///
    /// Returns a conflict when the task already reached a terminal status.
    pub fn cancel_task(&self, task_id: TaskId) -> RuntimeResult<Task> {
        let task = self.router.cancel(task_id)?;
        self.record(EntityRef::Task(task_id));
        Ok(task)
    }

    /// Records that the assignee started a task.
    ///
    /// # Errors
    ///
    /// Returns a conflict when `agent_id` does not hold the task.
    pub fn start_task(&self, task_id: TaskId, agent_id: AgentId) -> RuntimeResult<Task> {
        let task = self.router.start(task_id, agent_id)?;
        self.record(EntityRef::Task(task_id));
        Ok(task)
    }

    /// Records a task's result.
    ///
    /// # Errors
    ///
    /// Returns a conflict when `agent_id` does not hold the task or it is
    /// already terminal.
    pub fn complete_task(
        &self,
        task_id: TaskId,
        agent_id: AgentId,
        result: Value,
    ) -> RuntimeResult<Task> {
        let task = self.router.complete(task_id, agent_id, result)?;
        self.record(EntityRef::Task(task_id));
        Ok(task)
    }

    /// Records a task's failure.
    ///
    /// # Errors
    ///
    /// Returns a conflict when `agent_id` does not hold the task or it is
    /// already terminal.
    pub fn fail_task(
        &self,
        task_id: TaskId,
        agent_id: AgentId,
        reason: impl Into<String>,
    ) -> RuntimeResult<Task> {
        let task = self.router.fail(task_id, agent_id, reason)?;
        self.record(EntityRef::Task(task_id));
        Ok(task)
    }

    /// Returns one task.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown task.
    pub fn task_status(&self, task_id: TaskId) -> RuntimeResult<Task> {
        self.router.get(task_id).map_err(RuntimeError::from)
    }

    /// Lists tasks in submission order.
    ///
    /// # Errors
    ///
    /// Returns an internal error when router state is poisoned.
    pub fn list_tasks(&self, status_filter: Option<TaskStatus>) -> RuntimeResult<Vec<Task>> {
        self.router.list(status_filter).map_err(RuntimeError::from)
    }

    /// Returns how many tasks an agent holds.
    ///
    /// # Errors
    ///
    /// Returns an internal error when router state is poisoned.
    pub fn agent_load(&self, agent_id: AgentId) -> RuntimeResult<usize> {
        self.router.load(agent_id).map_err(RuntimeError::from)
    }

    // Messaging

    /// Enqueues a message without waiting for the recipient.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown recipient and an
    /// unavailable error when its mailbox is at the high-water mark.
    pub fn send_message(&self, request: SendRequest) -> RuntimeResult<Delivery> {
        self.bus.send(request).map_err(RuntimeError::from)
    }

    /// Waits for the next message addressed to `agent_id`.
    ///
    /// # Errors
    ///
    /// Returns a cancelled error when `cancel` fires first and a conflict
    /// when the mailbox is released while waiting.
    pub async fn receive(
        &self,
        agent_id: AgentId,
        cancel: &CancellationToken,
    ) -> RuntimeResult<Message> {
        self.bus
            .receive(agent_id, cancel)
            .await
            .map_err(RuntimeError::from)
    }

    /// Takes the next message if one is queued.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the agent has no mailbox.
    pub fn try_receive(&self, agent_id: AgentId) -> RuntimeResult<Option<Message>> {
        self.bus.try_receive(agent_id).map_err(RuntimeError::from)
    }

    // Tool servers

    /// Connects to a tool server and discovers its tools.
    ///
    /// # Errors
    ///
    /// Returns an unavailable error when the server cannot be reached and a
    /// fatal error when no protocol version is shared.
    pub async fn connect_tool_server(
        &self,
        address: ServerAddress,
        cancel: &CancellationToken,
    ) -> RuntimeResult<ToolConnection> {
        let connection = self.tools.connect(address, cancel).await?;
        self.record(EntityRef::Connection(connection.id()));
        Ok(connection)
    }

    /// Re-establishes a `disconnected` connection.
    ///
    /// # Errors
    ///
    /// Returns a conflict unless the connection is `disconnected`, plus the
    /// errors of [`Self::connect_tool_server`].
    pub async fn reconnect_tool_server(
        &self,
        connection_id: ConnectionId,
        cancel: &CancellationToken,
    ) -> RuntimeResult<ToolConnection> {
        let connection = self.tools.reconnect(connection_id, cancel).await?;
        self.record(EntityRef::Connection(connection.id()));
        Ok(connection)
    }

    /// Calls a tool on a connection.
    ///
    /// # Errors
    ///
    /// See [`ToolClientManager::invoke`].
    pub async fn invoke_tool(
        &self,
        request: InvokeRequest,
        cancel: &CancellationToken,
    ) -> RuntimeResult<ToolCallResult> {
        self.tools
            .invoke(request, cancel)
            .await
            .map_err(RuntimeError::from)
    }

    /// Closes a connection and forgets its configuration.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown connection.
    pub async fn close_connection(
        &self,
        connection_id: ConnectionId,
    ) -> RuntimeResult<ToolConnection> {
        let connection = self.tools.close(connection_id).await?;
        if let Some(journal) = &self.journal {
            journal.forget(EntityRef::Connection(connection_id));
        }
        Ok(connection)
    }

    /// Returns one connection.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown connection.
    pub fn connection_status(&self, connection_id: ConnectionId) -> RuntimeResult<ToolConnection> {
        self.tools.status(connection_id).map_err(RuntimeError::from)
    }

    /// Lists connections in creation order.
    ///
    /// # Errors
    ///
    /// Returns an internal error when the connection table is poisoned.
    pub fn list_connections(&self) -> RuntimeResult<Vec<ToolConnection>> {
        self.tools.list().map_err(RuntimeError::from)
    }

    // Model backends

    /// Registers a model backend after construction.
    ///
    /// # Errors
    ///
    /// Returns a conflict when the identifier is taken.
    pub fn register_backend(&self, backend: Arc<dyn ModelBackend>) -> RuntimeResult<()> {
        self.providers.register(backend).map_err(RuntimeError::from)
    }

    /// Generates with one backend.
    ///
    /// # Errors
    ///
    /// See [`ModelGateway::generate`].
    pub async fn generate(
        &self,
        backend_id: &BackendId,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> RuntimeResult<Generation> {
        self.providers
            .generate(backend_id, request, cancel)
            .await
            .map_err(RuntimeError::from)
    }

    /// Generates with the first backend of the fallback order that succeeds.
    ///
    /// # Errors
    ///
    /// See [`ModelGateway::generate_with_fallback`].
    pub async fn generate_with_fallback(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> RuntimeResult<Generation> {
        self.providers
            .generate_with_fallback(request, cancel)
            .await
            .map_err(RuntimeError::from)
    }

    /// Continues a raw prompt with one backend.
    ///
    /// # Errors
    ///
    /// See [`ModelGateway::generate_completion`].
    pub async fn generate_completion(
        &self,
        backend_id: &BackendId,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> RuntimeResult<Generation> {
        self.providers
            .generate_completion(backend_id, request, cancel)
            .await
            .map_err(RuntimeError::from)
    }

    /// Continues a raw prompt with the first backend of the fallback order
    /// that succeeds.
    ///
    /// # Errors
    ///
    /// See [`ModelGateway::generate_completion_with_fallback`].
    pub async fn generate_completion_with_fallback(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> RuntimeResult<Generation> {
        self.providers
            .generate_completion_with_fallback(request, cancel)
            .await
            .map_err(RuntimeError::from)
    }

    /// Embeds texts with one backend.
    ///
    /// # Errors
    ///
    /// See [`ModelGateway::embed`].
    pub async fn embed(
        &self,
        backend_id: &BackendId,
        request: &EmbeddingRequest,
        cancel: &CancellationToken,
    ) -> RuntimeResult<Embedded> {
        self.providers
            .embed(backend_id, request, cancel)
            .await
            .map_err(RuntimeError::from)
    }

    /// Embeds texts with the first backend of the fallback order that
    /// succeeds.
    ///
    /// # Errors
    ///
    /// See [`ModelGateway::embed_with_fallback`].
    pub async fn embed_with_fallback(
        &self,
        request: &EmbeddingRequest,
        cancel: &CancellationToken,
    ) -> RuntimeResult<Embedded> {
        self.providers
            .embed_with_fallback(request, cancel)
            .await
            .map_err(RuntimeError::from)
    }

    /// Returns whether a backend serves `model`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown backend.
    pub async fn is_model_available(
        &self,
        backend_id: &BackendId,
        model: &str,
    ) -> RuntimeResult<bool> {
        self.providers
            .is_model_available(backend_id, model)
            .await
            .map_err(RuntimeError::from)
    }

    /// Checks every registered backend.
    ///
    /// # Errors
    ///
    /// Returns an internal error when the backend table is poisoned.
    pub async fn backend_health(&self) -> RuntimeResult<Vec<BackendHealth>> {
        self.providers.health().await.map_err(RuntimeError::from)
    }

    // Events

    /// Subscribes to agent lifecycle transitions.
    #[must_use]
    pub fn subscribe_agents(&self) -> broadcast::Receiver<SequencedEvent<AgentLifecycleEvent>> {
        self.bus.control().agents().subscribe()
    }

    /// Subscribes to task status transitions.
    #[must_use]
    pub fn subscribe_tasks(&self) -> broadcast::Receiver<SequencedEvent<TaskStatusEvent>> {
        self.bus.control().tasks().subscribe()
    }

    /// Subscribes to connection state transitions.
    #[must_use]
    pub fn subscribe_connections(
        &self,
    ) -> broadcast::Receiver<SequencedEvent<ConnectionStateEvent>> {
        self.bus.control().connections().subscribe()
    }

    // Persistence and lifecycle

    /// Waits until every state change so far is stored.
    ///
    /// # Errors
    ///
    /// Returns the class of the latest failed write when any write since the
    /// previous flush failed.
    pub async fn flush(&self) -> RuntimeResult<JournalReport> {
        let Some(journal) = &self.journal else {
            return Ok(JournalReport::default());
        };
        journal.flush().await.map_err(RuntimeError::from)
    }

    /// Reloads persisted state after a restart.
    ///
    /// Running agents come back `idle` and stopping ones `terminated`.
    /// Assigned and running tasks return to `pending` and are reassigned.
    /// Connections are re-established once; those that fail stay
    /// `disconnected`.
    ///
    /// # Errors
    ///
    /// Returns an unavailable error when the store cannot be read.
    pub async fn recover(&self, cancel: &CancellationToken) -> RuntimeResult<RecoveryReport> {
        let Some(store) = &self.store else {
            return Ok(RecoveryReport::default());
        };
        let loaded = load_state(store.as_ref()).await?;

        let agents = self.registry.restore(loaded.agents)?;
        for agent in &agents {
            self.record(EntityRef::Agent(agent.id()));
        }
        let tasks = self.router.restore(loaded.tasks)?;
        self.record_tasks(&tasks);
        let reassigned = self.redispatch()?;
        let connections = self.tools.restore(loaded.connections, cancel).await?;
        let connections_ready = connections
            .iter()
            .filter(|connection| connection.state() == ConnectionState::Ready)
            .count();

        let report = RecoveryReport {
            agents: agents
                .iter()
                .filter(|agent| !agent.state().is_terminated())
                .count(),
            tasks: tasks.len(),
            reassigned: reassigned.len(),
            connections_ready,
            connections_down: connections.len().saturating_sub(connections_ready),
            skipped: loaded.skipped,
        };
        tracing::info!(
            agents = report.agents,
            tasks = report.tasks,
            reassigned = report.reassigned,
            connections_ready = report.connections_ready,
            connections_down = report.connections_down,
            "runtime recovered"
        );
        Ok(report)
    }

    /// Broadcasts `Shutdown` to every live agent, closes every connection
    /// and flushes the journal. Connection configurations are kept for the
    /// next [`Self::recover`].
    ///
    /// # Errors
    ///
    /// Returns the first failure among the broadcast, the closes and the
    /// flush.
    pub async fn shutdown(&self) -> RuntimeResult<()> {
        let notice = SendRequest::new(Recipient::Broadcast, MessagePayload::Shutdown);
        if let Delivery::Broadcast(report) = self.bus.send(notice)?
            && !report.overflowed.is_empty()
        {
            tracing::warn!(
                agents = ?report.overflowed,
                "shutdown notice not delivered to full mailboxes"
            );
        }
        for connection in self.tools.list()? {
            self.tools.close(connection.id()).await?;
        }
        self.flush().await?;
        tracing::info!("orchestrator shut down");
        Ok(())
    }
}
