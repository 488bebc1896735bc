//! Domain model for tool server connections.

mod address;
mod connection;
mod error;
mod ids;
mod tool;

pub use address::{HttpAddress, ServerAddress, StdioAddress};
pub use connection::{
    CallPolicy, ConnectionState, ConnectionStateEvent, PersistedConnectionData, ToolConnection,
};
pub use error::{ParseConnectionStateError, ToolProtocolDomainError};
pub use ids::ConnectionId;
pub use tool::{ToolCallResult, ToolSchema};
