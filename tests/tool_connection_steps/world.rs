//! Shared world state for tool connection BDD scenarios.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::eyre;
use mockable::DefaultClock;
use plexus::cancel::CancellationToken;
use plexus::config::RuntimeSettings;
use plexus::error::RuntimeError;
use plexus::orchestrator::Orchestrator;
use plexus::retry::{NoJitter, RecordingSleeper, Sleeper};
use plexus::tool_protocol::adapters::memory::InMemoryToolConnector;
use plexus::tool_protocol::domain::{ConnectionId, ToolCallResult};
use rstest::fixture;
use tokio::sync::Semaphore;

/// Sleeper that never lets a backoff delay elapse.
#[derive(Debug, Clone)]
pub struct StalledSleeper {
    permits: Arc<Semaphore>,
}

impl StalledSleeper {
    /// Creates a sleeper with no permits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
        }
    }
}

#[async_trait]
impl Sleeper for StalledSleeper {
    async fn sleep(&self, _duration: Duration) {
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

/// Scenario world for connection behaviour tests.
pub struct ConnectionWorld {
    pub settings: RuntimeSettings,
    pub sleeper: Arc<dyn Sleeper>,
    pub server: InMemoryToolConnector,
    pub runtime: Option<Orchestrator<DefaultClock>>,
    pub connection: Option<ConnectionId>,
    pub calls_before: u64,
    pub last_call: Option<Result<ToolCallResult, RuntimeError>>,
    pub cancel: CancellationToken,
}

impl ConnectionWorld {
    /// Creates a world with default settings and no runtime yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            settings: RuntimeSettings::default(),
            sleeper: Arc::new(RecordingSleeper::new()),
            server: InMemoryToolConnector::new(),
            runtime: None,
            connection: None,
            calls_before: 0,
            last_call: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Assembles the runtime around `server`.
    pub fn start(&mut self, server: InMemoryToolConnector) -> Result<(), eyre::Report> {
        let runtime = Orchestrator::builder(self.settings.clone(), Arc::new(DefaultClock))
            .with_connector(Arc::new(server.clone()))
            .with_jitter(Arc::new(NoJitter))
            .with_sleeper(Arc::clone(&self.sleeper))
            .build()?;
        self.server = server;
        self.runtime = Some(runtime);
        Ok(())
    }

    /// Returns the assembled runtime.
    pub fn runtime(&self) -> Result<&Orchestrator<DefaultClock>, eyre::Report> {
        self.runtime
            .as_ref()
            .ok_or_else(|| eyre!("runtime not started in scenario world"))
    }

    /// Returns the scenario's connection.
    pub fn connection(&self) -> Result<ConnectionId, eyre::Report> {
        self.connection
            .ok_or_else(|| eyre!("missing connection in scenario world"))
    }
}

impl Default for ConnectionWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixture that creates a new scenario world.
#[fixture]
pub fn world() -> ConnectionWorld {
    ConnectionWorld::default()
}

/// Runs an async operation within sync step definitions.
pub fn run_async<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
