//! Tool protocol services.

mod manager;

pub use manager::{InvokeRequest, ToolClientError, ToolClientManager, ToolClientResult};
