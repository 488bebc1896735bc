//! Then steps for task routing BDD scenarios.

use super::world::RoutingWorld;
use eyre::{bail, ensure};
use plexus::error::ErrorClass;
use rstest_bdd_macros::then;
use serde_json::json;

#[then(r#"the task is assigned to "{name}""#)]
fn task_assigned_to(world: &RoutingWorld, name: String) -> Result<(), eyre::Report> {
    let expected = world.agent(&name)?;
    let task = world.runtime.task_status(world.task_id()?)?;
    ensure!(
        task.assignee() == Some(expected),
        "expected {name}, found {:?}",
        task.assignee()
    );
    Ok(())
}

#[then(r#"the task status is "{status}""#)]
fn task_status_is(world: &RoutingWorld, status: String) -> Result<(), eyre::Report> {
    let task = world.runtime.task_status(world.task_id()?)?;
    ensure!(
        task.status().as_str() == status,
        "expected {status}, found {}",
        task.status()
    );
    Ok(())
}

#[then(r#""{name}" holds no tasks"#)]
fn agent_holds_nothing(world: &RoutingWorld, name: String) -> Result<(), eyre::Report> {
    let agent = world.agent(&name)?;
    let load = world.runtime.agent_load(agent)?;
    ensure!(load == 0, "{name} holds {load} tasks");
    Ok(())
}

#[then(r#"completing the task as "{name}" is rejected as a conflict"#)]
fn completion_rejected(world: &RoutingWorld, name: String) -> Result<(), eyre::Report> {
    let agent = world.agent(&name)?;
    let task_id = world.task_id()?;
    let Err(error) = world.runtime.complete_task(task_id, agent, json!({}))
    else {
        bail!("completing a cancelled task should fail");
    };
    ensure!(
        error.class() == ErrorClass::Conflict,
        "expected conflict, got {error}"
    );
    Ok(())
}

#[then("the last operation is rejected as a conflict")]
fn last_operation_rejected(world: &RoutingWorld) -> Result<(), eyre::Report> {
    let Some(error) = world.last_error.as_ref() else {
        bail!("the last operation succeeded");
    };
    ensure!(
        error.class() == ErrorClass::Conflict,
        "expected conflict, got {error}"
    );
    Ok(())
}
