//! Restart recovery from persisted documents.

use super::{build, fresh, search_server};
use crate::agent::domain::{AgentState, LifecycleEvent};
use crate::cancel::CancellationToken;
use crate::config::RuntimeSettings;
use crate::error::ErrorClass;
use crate::orchestrator::{Orchestrator, RecoveryReport};
use crate::persistence::domain::{Collection, Document, DocumentKey};
use crate::persistence::ports::DocumentStore;
use crate::task::domain::TaskStatus;
use crate::task::services::SubmitTaskRequest;
use crate::tool_protocol::domain::{ConnectionState, ServerAddress};
use chrono::Utc;
use eyre::{bail, ensure};
use mockable::DefaultClock;
use serde_json::json;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread")]
async fn restart_resets_running_work_and_reassigns_it() -> eyre::Result<()> {
    let cancel = CancellationToken::new();
    let before = fresh();
    let agent = before.idle_agent(&["search"]);
    let running = before
        .runtime
        .submit_task(SubmitTaskRequest::new("search", json!({ "q": "a" })))?;
    before.runtime.start_task(running.id(), agent)?;
    let finished = before
        .runtime
        .submit_task(SubmitTaskRequest::new("search", json!({ "q": "b" })))?;
    before
        .runtime
        .complete_task(finished.id(), agent, json!({ "hits": 0 }))?;
    before
        .runtime
        .transition_agent(agent, LifecycleEvent::Start)?;
    let waiting = before
        .runtime
        .submit_task(SubmitTaskRequest::new("fetch", json!({ "url": "x" })))?;
    before
        .runtime
        .connect_tool_server(ServerAddress::stdio("search-server")?, &cancel)
        .await?;
    before.runtime.flush().await?;

    let after = build(&before.store, &before.server);
    let report = after.runtime.recover(&cancel).await?;

    ensure!(
        report
            == RecoveryReport {
                agents: 1,
                tasks: 2,
                reassigned: 1,
                connections_ready: 1,
                connections_down: 0,
                skipped: Vec::new(),
            },
        "unexpected report: {report:?}"
    );
    ensure!(after.runtime.agent(agent)?.state() == AgentState::Idle);
    let reassigned = after.runtime.task_status(running.id())?;
    ensure!(reassigned.status() == TaskStatus::Assigned);
    ensure!(reassigned.assignee() == Some(agent));
    ensure!(after.runtime.task_status(waiting.id())?.status() == TaskStatus::Pending);

    let Err(error) = after.runtime.task_status(finished.id()) else {
        bail!("terminal tasks should not be restored");
    };
    ensure!(error.class() == ErrorClass::Validation);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_server_stays_disconnected_until_reconnected() -> eyre::Result<()> {
    let cancel = CancellationToken::new();
    let before = fresh();
    let connection = before
        .runtime
        .connect_tool_server(ServerAddress::stdio("search-server")?, &cancel)
        .await?;
    before.runtime.flush().await?;
    before.server.set_offline(true);

    let after = build(&before.store, &before.server);
    let report = after.runtime.recover(&cancel).await?;

    ensure!(report.connections_ready == 0 && report.connections_down == 1);
    ensure!(
        after.runtime.connection_status(connection.id())?.state()
            == ConnectionState::Disconnected
    );

    before.server.set_offline(false);
    let restored = after
        .runtime
        .reconnect_tool_server(connection.id(), &cancel)
        .await?;
    ensure!(restored.state() == ConnectionState::Ready);
    ensure!(restored.tool("search").is_some());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn undecodable_documents_are_reported_not_fatal() -> eyre::Result<()> {
    let cancel = CancellationToken::new();
    let harness = fresh();
    let key = DocumentKey::new(Collection::Agents, "agent-garbled")?;
    harness
        .store
        .put(Document::new(key.clone(), json!({ "bogus": true }), Utc::now()))
        .await?;

    let report = harness.runtime.recover(&cancel).await?;

    ensure!(report.skipped == vec![key]);
    ensure!(report.agents == 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn recovery_without_store_is_empty() -> eyre::Result<()> {
    let runtime = Orchestrator::builder(RuntimeSettings::default(), Arc::new(DefaultClock))
        .with_connector(Arc::new(search_server()))
        .build()?;

    let report = runtime.recover(&CancellationToken::new()).await?;

    ensure!(report == RecoveryReport::default());
    ensure!(runtime.flush().await?.written == 0);
    Ok(())
}
