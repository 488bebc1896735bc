//! When steps for task routing BDD scenarios.

use super::world::RoutingWorld;
use eyre::WrapErr;
use plexus::task::services::SubmitTaskRequest;
use rstest_bdd_macros::when;
use serde_json::json;

#[when(r#"a "{capability}" task is submitted"#)]
fn submit_task(world: &mut RoutingWorld, capability: String) -> Result<(), eyre::Report> {
    let task = world
        .runtime
        .submit_task(SubmitTaskRequest::new(capability, json!({ "query": "rust" })))
        .wrap_err("submit task")?;
    world.last_task = Some(task);
    Ok(())
}

#[when("the task is cancelled")]
fn cancel_task(world: &mut RoutingWorld) -> Result<(), eyre::Report> {
    let task_id = world.task_id()?;
    let result = world.runtime.cancel_task(task_id);
    world.record(result);
    Ok(())
}

#[when(r#"an idle agent "{name}" offering "{capability}" registers"#)]
fn agent_registers(
    world: &mut RoutingWorld,
    name: String,
    capability: String,
) -> Result<(), eyre::Report> {
    world
        .register_idle(&name, &capability)
        .wrap_err("register late agent")?;
    Ok(())
}

#[when(r#""{name}" completes the task"#)]
fn agent_completes(world: &mut RoutingWorld, name: String) -> Result<(), eyre::Report> {
    let agent = world.agent(&name)?;
    let task_id = world.task_id()?;
    let result = world
        .runtime
        .complete_task(task_id, agent, json!({ "hits": 1 }));
    world.record(result);
    Ok(())
}
