//! Domain model for routed tasks.

mod error;
mod ids;
mod status;
mod task;

pub use error::{ParseTaskStatusError, TaskDomainError};
pub use ids::{Priority, TaskId};
pub use status::{TaskOutcome, TaskStatus, TaskStatusEvent};
pub use task::{PersistedTaskData, Task};
