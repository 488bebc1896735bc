//! Routing service owning the task table.

mod router;

pub use router::{SubmitTaskRequest, TaskRouter, TaskRouterError, TaskRouterResult};
