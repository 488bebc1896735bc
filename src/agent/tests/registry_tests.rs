//! Registry service tests covering registration policy and lifecycle events.

use std::sync::Arc;

use crate::agent::domain::{AgentDomainError, AgentState, LifecycleEvent};
use crate::agent::services::{AgentRegistry, AgentRegistryError, RegisterAgentRequest};
use crate::bus::domain::{BusError, MessagePayload, Recipient, SendRequest};
use crate::bus::services::MessageBus;
use crate::config::{BusSettings, RegistrySettings};
use crate::error::{Classify, ErrorClass};
use mockable::DefaultClock;
use rstest::{fixture, rstest};
use serde_json::json;

struct Harness {
    bus: Arc<MessageBus<DefaultClock>>,
    registry: AgentRegistry<DefaultClock>,
}

fn harness_with(settings: &RegistrySettings) -> Harness {
    let clock = Arc::new(DefaultClock);
    let bus = Arc::new(MessageBus::new(&BusSettings::default(), Arc::clone(&clock)));
    let registry = AgentRegistry::new(settings, Arc::clone(&bus), clock);
    Harness { bus, registry }
}

#[fixture]
fn harness() -> Harness {
    harness_with(&RegistrySettings::default())
}

#[rstest]
fn register_assigns_increasing_sequence_and_opens_mailbox(harness: Harness) {
    let first = harness
        .registry
        .register(RegisterAgentRequest::new(["search"]))
        .expect("first registration should succeed");
    let second = harness
        .registry
        .register(RegisterAgentRequest::new(["search"]).with_name("second"))
        .expect("duplicate capabilities are allowed by default");

    assert!(first.registration_seq() < second.registration_seq());
    assert_eq!(first.state(), AgentState::Created);
    assert_eq!(second.name(), Some("second"));
    assert_eq!(harness.bus.has_mailbox(first.id()), Ok(true));
}

#[rstest]
fn unique_capability_policy_rejects_overlap() {
    let harness = harness_with(&RegistrySettings {
        unique_capabilities: true,
    });
    let holder = harness
        .registry
        .register(RegisterAgentRequest::new(["search", "fetch"]))
        .expect("first registration should succeed");

    let result = harness
        .registry
        .register(RegisterAgentRequest::new(["fetch"]));

    let Err(error) = result else {
        panic!("overlapping registration should fail");
    };
    assert_eq!(error.class(), ErrorClass::Conflict);
    assert!(matches!(
        error,
        AgentRegistryError::DuplicateCapabilityConflict { holder: id, .. } if id == holder.id()
    ));
}

#[rstest]
fn unique_capability_policy_ignores_terminated_agents() {
    let harness = harness_with(&RegistrySettings {
        unique_capabilities: true,
    });
    let holder = harness
        .registry
        .register(RegisterAgentRequest::new(["search"]))
        .expect("registration should succeed");
    harness
        .registry
        .remove(holder.id())
        .expect("remove should succeed");

    harness
        .registry
        .register(RegisterAgentRequest::new(["search"]))
        .expect("capability is free once the holder terminated");
}

#[rstest]
#[case(AgentState::Stopping)]
#[case(AgentState::Terminated)]
fn register_rejects_shutdown_initial_states(harness: Harness, #[case] state: AgentState) {
    let result = harness
        .registry
        .register(RegisterAgentRequest::new(["search"]).with_initial_state(state));

    assert_eq!(
        result.map(|agent| agent.id()),
        Err(AgentRegistryError::Domain(
            AgentDomainError::InvalidInitialState(state)
        ))
    );
}

#[rstest]
fn transition_rejects_unknown_agent(harness: Harness) {
    let missing = crate::agent::domain::AgentId::new();
    let result = harness.registry.transition(missing, LifecycleEvent::Ready);

    assert_eq!(result, Err(AgentRegistryError::UnknownAgent(missing)));
}

#[rstest]
fn invalid_transition_is_a_conflict(harness: Harness) {
    let agent = harness
        .registry
        .register(RegisterAgentRequest::new(["search"]))
        .expect("registration should succeed");

    let error = harness
        .registry
        .transition(agent.id(), LifecycleEvent::Start)
        .expect_err("created agents cannot start");

    assert_eq!(error.class(), ErrorClass::Conflict);
    assert_eq!(error.entity_id(), Some(agent.id().to_string()));
    assert_eq!(
        harness.registry.get(agent.id()).map(|found| found.state()),
        Ok(AgentState::Created)
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn transitions_publish_sequenced_lifecycle_events(harness: Harness) {
    let mut events = harness.bus.control().agents().subscribe();
    let agent = harness
        .registry
        .register(RegisterAgentRequest::new(["search"]))
        .expect("registration should succeed");
    harness
        .registry
        .transition(agent.id(), LifecycleEvent::Initialize)
        .expect("initialize should succeed");
    harness
        .registry
        .transition(agent.id(), LifecycleEvent::Ready)
        .expect("ready should succeed");

    let registered = events.recv().await.expect("registration event");
    let initializing = events.recv().await.expect("initialize event");
    let idle = events.recv().await.expect("ready event");

    assert_eq!(registered.sequence, 1);
    assert_eq!(registered.event.from, None);
    assert_eq!(initializing.sequence, 2);
    assert_eq!(initializing.event.to, AgentState::Initializing);
    assert_eq!(idle.sequence, 3);
    assert_eq!(idle.event.from, Some(AgentState::Initializing));
    assert_eq!(idle.event.event, Some(LifecycleEvent::Ready));
}

#[rstest]
fn remove_terminates_and_is_idempotent(harness: Harness) {
    let agent = harness
        .registry
        .register(RegisterAgentRequest::new(["search"]).with_initial_state(AgentState::Idle))
        .expect("registration should succeed");
    harness
        .registry
        .update_state_blob(agent.id(), json!({"cursor": 4}))
        .expect("blob update should succeed");

    let first = harness
        .registry
        .remove(agent.id())
        .expect("remove should succeed");
    let second = harness
        .registry
        .remove(agent.id())
        .expect("second remove should succeed");

    let states: Vec<AgentState> = first.iter().map(|transition| transition.to).collect();
    assert_eq!(states, vec![AgentState::Stopping, AgentState::Terminated]);
    assert!(second.is_empty());

    let removed = harness.registry.get(agent.id()).expect("tombstone is kept");
    assert_eq!(removed.state(), AgentState::Terminated);
    assert!(removed.state_blob().is_null());
    assert_eq!(harness.bus.has_mailbox(agent.id()), Ok(false));
}

#[rstest]
fn terminated_mailbox_rejects_messages(harness: Harness) {
    let agent = harness
        .registry
        .register(RegisterAgentRequest::new(["search"]))
        .expect("registration should succeed");
    harness
        .registry
        .remove(agent.id())
        .expect("remove should succeed");

    let result = harness.bus.send(SendRequest::new(
        Recipient::Agent(agent.id()),
        MessagePayload::Shutdown,
    ));

    assert_eq!(result, Err(BusError::UnknownRecipient(agent.id())));
}

#[rstest]
fn terminated_agent_rejects_blob_updates(harness: Harness) {
    let agent = harness
        .registry
        .register(RegisterAgentRequest::new(["search"]))
        .expect("registration should succeed");
    harness
        .registry
        .remove(agent.id())
        .expect("remove should succeed");

    let result = harness
        .registry
        .update_state_blob(agent.id(), json!({}))
        .map(|updated| updated.id());

    assert_eq!(result, Err(AgentRegistryError::Terminated(agent.id())));
}

#[rstest]
fn list_filters_by_state_in_registration_order(harness: Harness) {
    let idle_a = harness
        .registry
        .register(RegisterAgentRequest::new(["a"]).with_initial_state(AgentState::Idle))
        .expect("registration should succeed");
    harness
        .registry
        .register(RegisterAgentRequest::new(["b"]))
        .expect("registration should succeed");
    let idle_c = harness
        .registry
        .register(RegisterAgentRequest::new(["c"]).with_initial_state(AgentState::Idle))
        .expect("registration should succeed");

    let idle: Vec<_> = harness
        .registry
        .list(Some(AgentState::Idle))
        .expect("list should succeed")
        .iter()
        .map(crate::agent::domain::Agent::id)
        .collect();
    let all = harness.registry.list(None).expect("list should succeed");

    assert_eq!(idle, vec![idle_a.id(), idle_c.id()]);
    assert_eq!(all.len(), 3);
}

#[rstest]
fn restore_rederives_transient_states(harness: Harness) {
    let source = harness_with(&RegistrySettings::default());
    let running = source
        .registry
        .register(RegisterAgentRequest::new(["a"]).with_initial_state(AgentState::Idle))
        .expect("registration should succeed");
    source
        .registry
        .transition(running.id(), LifecycleEvent::Start)
        .expect("start should succeed");
    let stopping = source
        .registry
        .register(RegisterAgentRequest::new(["b"]).with_initial_state(AgentState::Idle))
        .expect("registration should succeed");
    source
        .registry
        .transition(stopping.id(), LifecycleEvent::Stop)
        .expect("stop should succeed");
    let snapshot = source.registry.list(None).expect("list should succeed");

    let restored = harness
        .registry
        .restore(snapshot)
        .expect("restore should succeed");

    let states: Vec<AgentState> = restored.iter().map(crate::agent::domain::Agent::state).collect();
    assert_eq!(states, vec![AgentState::Idle, AgentState::Terminated]);
    assert_eq!(harness.bus.has_mailbox(running.id()), Ok(true));
    assert_eq!(harness.bus.has_mailbox(stopping.id()), Ok(false));

    let next = harness
        .registry
        .register(RegisterAgentRequest::new(["c"]))
        .expect("registration should succeed");
    assert!(next.registration_seq() > stopping.registration_seq());
}
