//! Orchestrator tests.

mod recovery_tests;

use crate::agent::domain::{AgentId, AgentState};
use crate::agent::services::RegisterAgentRequest;
use crate::config::RuntimeSettings;
use crate::orchestrator::Orchestrator;
use crate::persistence::adapters::memory::InMemoryDocumentStore;
use crate::provider::adapters::scripted::ScriptedBackend;
use crate::provider::domain::BackendId;
use crate::retry::{NoJitter, RecordingSleeper};
use crate::tool_protocol::adapters::memory::InMemoryToolConnector;
use crate::tool_protocol::domain::ToolSchema;
use mockable::DefaultClock;
use serde_json::json;
use std::sync::Arc;

const MODEL: &str = "llama3";

/// Runtime wired to in-memory collaborators the test keeps handles to.
struct Harness {
    runtime: Orchestrator<DefaultClock>,
    store: InMemoryDocumentStore,
    server: InMemoryToolConnector,
}

impl Harness {
    fn idle_agent(&self, capabilities: &[&str]) -> AgentId {
        self.runtime
            .register_agent(
                RegisterAgentRequest::new(capabilities.iter().copied())
                    .with_initial_state(AgentState::Idle),
            )
            .expect("registration should succeed")
            .id()
    }
}

fn search_server() -> InMemoryToolConnector {
    InMemoryToolConnector::with_tools([
        ToolSchema::new("search", json!({ "type": "object" })).expect("schema is valid")
    ])
}

fn local_backend() -> ScriptedBackend {
    ScriptedBackend::new(
        BackendId::new("local").expect("backend id is valid"),
        [MODEL.to_owned()],
    )
}

fn build(store: &InMemoryDocumentStore, server: &InMemoryToolConnector) -> Harness {
    let runtime = Orchestrator::builder(RuntimeSettings::default(), Arc::new(DefaultClock))
        .with_connector(Arc::new(server.clone()))
        .with_store(Arc::new(store.clone()))
        .with_backend(Arc::new(local_backend()))
        .with_jitter(Arc::new(NoJitter))
        .with_sleeper(Arc::new(RecordingSleeper::new()))
        .build()
        .expect("orchestrator should build");
    Harness {
        runtime,
        store: store.clone(),
        server: server.clone(),
    }
}

fn fresh() -> Harness {
    build(&InMemoryDocumentStore::new(), &search_server())
}
