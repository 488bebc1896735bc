//! Behaviour tests for task assignment, cancellation and terminal states.

#[path = "task_routing_steps/mod.rs"]
mod task_routing_steps_defs;

use rstest_bdd_macros::scenario;
use task_routing_steps_defs::world::{RoutingWorld, world};

#[scenario(
    path = "tests/features/task_routing.feature",
    name = "Least-loaded agent receives the next task"
)]
#[tokio::test(flavor = "multi_thread")]
async fn least_loaded_agent_receives_task(world: RoutingWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/task_routing.feature",
    name = "Cancelled pending task is never handed out"
)]
#[tokio::test(flavor = "multi_thread")]
async fn cancelled_pending_task_is_never_handed_out(world: RoutingWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/task_routing.feature",
    name = "Terminal tasks ignore further transitions"
)]
#[tokio::test(flavor = "multi_thread")]
async fn terminal_tasks_ignore_further_transitions(world: RoutingWorld) {
    let _ = world;
}
