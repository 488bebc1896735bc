//! Given steps for tool connection BDD scenarios.

use std::sync::Arc;

use super::world::{ConnectionWorld, StalledSleeper, run_async};
use eyre::WrapErr;
use plexus::config::RuntimeSettings;
use plexus::tool_protocol::adapters::memory::InMemoryToolConnector;
use plexus::tool_protocol::domain::{ServerAddress, ToolSchema};
use rstest_bdd_macros::given;
use serde_json::json;

#[given("a runtime allowing {attempts:u32} reconnection attempts")]
fn runtime_with_ceiling(world: &mut ConnectionWorld, attempts: u32) {
    world.settings = RuntimeSettings::default().with_reconnect_attempts(attempts);
}

#[given("a runtime whose reconnection is stalled")]
fn runtime_with_stalled_reconnection(world: &mut ConnectionWorld) {
    world.sleeper = Arc::new(StalledSleeper::new());
}

#[given(r#"a connected tool server offering "{tool}""#)]
fn connected_server(world: &mut ConnectionWorld, tool: String) -> Result<(), eyre::Report> {
    let schema = ToolSchema::new(tool, json!({ "type": "object" }))?;
    world.start(InMemoryToolConnector::with_tools([schema]))?;
    let runtime = world.runtime()?;
    let connection = run_async(
        runtime.connect_tool_server(ServerAddress::stdio("scenario-server")?, &world.cancel),
    )
    .wrap_err("connect scenario server")?;
    world.connection = Some(connection.id());
    Ok(())
}
