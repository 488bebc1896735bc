//! Port contracts for reaching tool servers.

mod session;

pub use session::{SessionError, SessionResult, ToolConnector, ToolSession};
