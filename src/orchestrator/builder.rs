//! Assembles an [`Orchestrator`] from settings and collaborators.

use super::runtime::Orchestrator;
use super::snapshots::ComponentSnapshots;
use crate::agent::services::AgentRegistry;
use crate::bus::services::MessageBus;
use crate::config::RuntimeSettings;
use crate::error::RuntimeResult;
use crate::persistence::ports::{DocumentStore, SnapshotSource};
use crate::persistence::services::Journal;
use crate::provider::ports::ModelBackend;
use crate::provider::services::ModelGateway;
use crate::retry::{JitterSource, Sleeper};
use crate::task::services::TaskRouter;
use crate::tool_protocol::adapters::stdio::StdioConnector;
use crate::tool_protocol::ports::ToolConnector;
use crate::tool_protocol::services::ToolClientManager;
use mockable::Clock;
use std::sync::Arc;

/// Builder for [`Orchestrator`].
///
/// Without a connector, tool servers are launched over stdio. Without a
/// store, nothing is persisted and [`Orchestrator::recover`] has nothing to
/// load.
pub struct OrchestratorBuilder<C>
where
    C: Clock + Send + Sync + 'static,
{
    settings: RuntimeSettings,
    clock: Arc<C>,
    connector: Option<Arc<dyn ToolConnector>>,
    store: Option<Arc<dyn DocumentStore>>,
    backends: Vec<Arc<dyn ModelBackend>>,
    jitter: Option<Arc<dyn JitterSource>>,
    sleeper: Option<Arc<dyn Sleeper>>,
}

impl<C> OrchestratorBuilder<C>
where
    C: Clock + Send + Sync + 'static,
{
    /// Starts a builder from materialized settings.
    #[must_use]
    pub fn new(settings: RuntimeSettings, clock: Arc<C>) -> Self {
        Self {
            settings,
            clock,
            connector: None,
            store: None,
            backends: Vec::new(),
            jitter: None,
            sleeper: None,
        }
    }

    /// Uses `connector` to open tool server sessions.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn ToolConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Journals state changes to `store` and recovers from it.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Registers a model backend.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Replaces the jitter source for reconnection and retry delays.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Replaces the sleeper for reconnection and retry delays.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Wires the components together.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the provider fallback order names a
    /// blank backend, and a conflict when two backends share an identifier.
    ///
    /// # Panics
    ///
    /// Panics when a store is configured and no tokio runtime is running,
    /// because the journal worker is spawned onto the current runtime.
    pub fn build(self) -> RuntimeResult<Orchestrator<C>> {
        let Self {
            settings,
            clock,
            connector,
            store,
            backends,
            jitter,
            sleeper,
        } = self;

        let bus = Arc::new(MessageBus::new(&settings.bus, Arc::clone(&clock)));
        let registry = Arc::new(AgentRegistry::new(
            &settings.registry,
            Arc::clone(&bus),
            Arc::clone(&clock),
        ));
        let router = Arc::new(TaskRouter::new(
            Arc::clone(&registry),
            Arc::clone(&bus),
            Arc::clone(&clock),
        ));

        let connector = connector.unwrap_or_else(|| -> Arc<dyn ToolConnector> {
            Arc::new(StdioConnector::new(env!("CARGO_PKG_NAME")))
        });
        let mut manager =
            ToolClientManager::new(&settings.tools, connector, bus.control(), Arc::clone(&clock));
        let mut providers = ModelGateway::new(&settings.providers)?;
        if let Some(source) = jitter {
            manager = manager.with_jitter(Arc::clone(&source));
            providers = providers.with_jitter(source);
        }
        if let Some(waiter) = sleeper {
            manager = manager.with_sleeper(Arc::clone(&waiter));
            providers = providers.with_sleeper(waiter);
        }
        for backend in backends {
            providers.register(backend)?;
        }
        let tools = Arc::new(manager);

        let journal = store.as_ref().map(|documents| {
            let source: Arc<dyn SnapshotSource> = Arc::new(ComponentSnapshots {
                registry: Arc::clone(&registry),
                router: Arc::clone(&router),
                tools: Arc::clone(&tools),
            });
            Journal::spawn(Arc::clone(documents), source, Arc::clone(&clock))
        });

        tracing::info!(
            persistent = journal.is_some(),
            unique_capabilities = settings.registry.unique_capabilities,
            "orchestrator assembled"
        );
        Ok(Orchestrator {
            bus,
            registry,
            router,
            tools,
            providers: Arc::new(providers),
            store,
            journal,
        })
    }
}
