//! Shared world state for task routing BDD scenarios.

use std::collections::HashMap;
use std::sync::Arc;

use eyre::eyre;
use mockable::DefaultClock;
use plexus::agent::domain::{AgentId, AgentState};
use plexus::agent::services::RegisterAgentRequest;
use plexus::config::RuntimeSettings;
use plexus::error::RuntimeError;
use plexus::orchestrator::Orchestrator;
use plexus::task::domain::{Task, TaskId};
use rstest::fixture;

/// Scenario world for routing behaviour tests.
pub struct RoutingWorld {
    pub runtime: Orchestrator<DefaultClock>,
    pub agents: HashMap<String, AgentId>,
    pub last_task: Option<Task>,
    pub last_error: Option<RuntimeError>,
}

impl RoutingWorld {
    /// Creates a world around a runtime with default settings and no store.
    ///
    /// # Panics
    ///
    /// Panics when the runtime cannot be assembled.
    #[must_use]
    pub fn new() -> Self {
        let runtime = Orchestrator::builder(RuntimeSettings::default(), Arc::new(DefaultClock))
            .build()
            .expect("runtime should build with default settings");
        Self {
            runtime,
            agents: HashMap::new(),
            last_task: None,
            last_error: None,
        }
    }

    /// Registers a named agent directly into `idle`.
    pub fn register_idle(&mut self, name: &str, capability: &str) -> Result<AgentId, eyre::Report> {
        let agent = self.runtime.register_agent(
            RegisterAgentRequest::new([capability])
                .with_name(name)
                .with_initial_state(AgentState::Idle),
        )?;
        self.agents.insert(name.to_owned(), agent.id());
        Ok(agent.id())
    }

    /// Looks up a named agent.
    pub fn agent(&self, name: &str) -> Result<AgentId, eyre::Report> {
        self.agents
            .get(name)
            .copied()
            .ok_or_else(|| eyre!("no agent named {name} in scenario world"))
    }

    /// Returns the identifier of the most recently submitted task.
    pub fn task_id(&self) -> Result<TaskId, eyre::Report> {
        self.last_task
            .as_ref()
            .map(Task::id)
            .ok_or_else(|| eyre!("missing submitted task in scenario world"))
    }

    /// Records the outcome of an operation that may be rejected.
    pub fn record(&mut self, result: Result<Task, RuntimeError>) {
        match result {
            Ok(task) => {
                self.last_task = Some(task);
                self.last_error = None;
            }
            Err(error) => self.last_error = Some(error),
        }
    }
}

impl Default for RoutingWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixture that creates a new scenario world.
#[fixture]
pub fn world() -> RoutingWorld {
    RoutingWorld::default()
}
