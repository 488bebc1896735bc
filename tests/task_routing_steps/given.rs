//! Given steps for task routing BDD scenarios.

use super::world::RoutingWorld;
use eyre::{WrapErr, ensure};
use plexus::task::services::SubmitTaskRequest;
use rstest_bdd_macros::given;
use serde_json::json;

#[given(r#"an idle agent "{name}" offering "{capability}""#)]
fn idle_agent(
    world: &mut RoutingWorld,
    name: String,
    capability: String,
) -> Result<(), eyre::Report> {
    world
        .register_idle(&name, &capability)
        .wrap_err("register idle agent")?;
    Ok(())
}

#[given(r#""{name}" already holds a "{capability}" task"#)]
fn agent_holds_task(
    world: &mut RoutingWorld,
    name: String,
    capability: String,
) -> Result<(), eyre::Report> {
    let holder = world.agent(&name)?;
    let task = world
        .runtime
        .submit_task(SubmitTaskRequest::new(capability, json!({ "seed": true })))
        .wrap_err("submit seed task")?;
    ensure!(
        task.assignee() == Some(holder),
        "seed task went to {:?} instead of {name}",
        task.assignee()
    );
    Ok(())
}

#[given(r#"no agent offers "{capability}""#)]
fn no_agent_offers(world: &mut RoutingWorld, capability: String) -> Result<(), eyre::Report> {
    let agents = world.runtime.list_agents(None)?;
    ensure!(
        agents
            .iter()
            .all(|agent| !agent.capabilities().iter().any(|held| held.as_str() == capability)),
        "an agent already offers {capability}"
    );
    Ok(())
}
