//! When steps for tool connection BDD scenarios.

use super::world::{ConnectionWorld, run_async};
use eyre::ensure;
use plexus::tool_protocol::domain::CallPolicy;
use plexus::tool_protocol::services::InvokeRequest;
use rstest_bdd_macros::when;
use serde_json::json;

#[when("the server goes offline")]
fn server_offline(world: &mut ConnectionWorld) {
    world.server.set_offline(true);
}

#[when("a transport fault degrades the connection")]
fn transport_fault(world: &mut ConnectionWorld) -> Result<(), eyre::Report> {
    world.server.fail_next_calls(1);
    let runtime = world.runtime()?;
    let request = InvokeRequest::new(world.connection()?, "search", json!({ "q": "fault" }));
    let result = run_async(runtime.invoke_tool(request, &world.cancel));
    ensure!(result.is_err(), "the faulty call should fail");
    world.calls_before = world.server.call_count();
    Ok(())
}

#[when(r#""{tool}" is invoked"#)]
fn invoke(world: &mut ConnectionWorld, tool: String) -> Result<(), eyre::Report> {
    let runtime = world.runtime()?;
    let request = InvokeRequest::new(world.connection()?, tool, json!({ "q": "rust" }));
    let result = run_async(runtime.invoke_tool(request, &world.cancel));
    world.last_call = Some(result);
    Ok(())
}

#[when(r#""{tool}" is invoked failing fast"#)]
fn invoke_fail_fast(world: &mut ConnectionWorld, tool: String) -> Result<(), eyre::Report> {
    let runtime = world.runtime()?;
    let request = InvokeRequest::new(world.connection()?, tool, json!({ "q": "rust" }))
        .with_policy(CallPolicy::FailFast);
    let result = run_async(runtime.invoke_tool(request, &world.cancel));
    world.last_call = Some(result);
    Ok(())
}
