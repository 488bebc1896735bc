//! Transport-facing port for tool server sessions.

use crate::tool_protocol::domain::{ServerAddress, ToolCallResult, ToolSchema};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Opens sessions to tool servers.
#[async_trait]
pub trait ToolConnector: Send + Sync {
    /// Returns whether this connector can reach `address` at all.
    fn supports(&self, _address: &ServerAddress) -> bool {
        true
    }

    /// Establishes a transport to `address`. No protocol messages are
    /// exchanged yet.
    async fn open(&self, address: &ServerAddress) -> SessionResult<Arc<dyn ToolSession>>;
}

/// One live protocol session with a tool server.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Performs the handshake, offering `supported_versions` (newest first),
    /// and returns the version the server chose.
    async fn initialize(&self, supported_versions: &[String]) -> SessionResult<String>;

    /// Lists every tool the server exposes.
    async fn list_tools(&self) -> SessionResult<Vec<ToolSchema>>;

    /// Calls a tool. Tool-level failures come back as a result with
    /// `is_error` set, not as an error.
    async fn call_tool(&self, name: &str, arguments: Value) -> SessionResult<ToolCallResult>;

    /// Ends the session.
    async fn close(&self) -> SessionResult<()>;
}

/// Errors returned by tool sessions.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The transport failed: the process died, the pipe broke, the peer
    /// went away.
    #[error("transport failure: {0}")]
    Transport(Arc<dyn std::error::Error + Send + Sync>),

    /// The server answered with a protocol-level error.
    #[error("server rejected request ({code}): {message}")]
    Rejected {
        /// Protocol error code.
        code: i64,
        /// Server-supplied message.
        message: String,
    },

    /// The server sent something that is not a valid protocol message.
    #[error("malformed server response: {0}")]
    Protocol(String),

    /// The connector cannot reach this kind of address.
    #[error("unsupported server address: {0}")]
    Unsupported(String),
}

impl SessionError {
    /// Wraps a transport error.
    pub fn transport(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Transport(Arc::new(err))
    }

    /// Returns whether the error means the transport itself is broken.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
