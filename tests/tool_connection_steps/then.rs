//! Then steps for tool connection BDD scenarios.

use std::time::Duration;

use super::world::{ConnectionWorld, run_async};
use eyre::{WrapErr, bail, ensure};
use plexus::error::ErrorClass;
use plexus::tool_protocol::domain::ConnectionState;
use rstest_bdd_macros::then;

#[then("the call is rejected as unavailable")]
fn call_unavailable(world: &ConnectionWorld) -> Result<(), eyre::Report> {
    let Some(Err(error)) = world.last_call.as_ref() else {
        bail!("expected a rejected call, got {:?}", world.last_call);
    };
    ensure!(
        error.class() == ErrorClass::Unavailable,
        "expected unavailable, got {error}"
    );
    Ok(())
}

#[then(r#"the connection ends up "{state}""#)]
fn connection_ends_up(world: &ConnectionWorld, state: String) -> Result<(), eyre::Report> {
    let runtime = world.runtime()?;
    let connection_id = world.connection()?;
    run_async(tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match runtime.connection_status(connection_id) {
                Ok(connection) if connection.state().as_str() == state => return Ok(()),
                Ok(_) => tokio::time::sleep(Duration::from_millis(5)).await,
                Err(error) => return Err(error),
            }
        }
    }))
    .wrap_err_with(|| format!("connection did not reach {state} in time"))??;
    Ok(())
}

#[then(r#"the connection is "{state}""#)]
fn connection_is(world: &ConnectionWorld, state: String) -> Result<(), eyre::Report> {
    let connection = world.runtime()?.connection_status(world.connection()?)?;
    ensure!(
        connection.state().as_str() == state,
        "expected {state}, found {}",
        connection.state()
    );
    Ok(())
}

#[then("the server saw {count:u64} handshakes")]
fn handshakes_seen(world: &ConnectionWorld, count: u64) -> Result<(), eyre::Report> {
    let seen = world.server.handshake_count();
    ensure!(seen == count, "expected {count} handshakes, saw {seen}");
    Ok(())
}

#[then("the server saw no further calls")]
fn no_further_calls(world: &ConnectionWorld) -> Result<(), eyre::Report> {
    let seen = world.server.call_count();
    ensure!(
        seen == world.calls_before,
        "server saw {} calls after the fault",
        seen.saturating_sub(world.calls_before)
    );
    Ok(())
}
