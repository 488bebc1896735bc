//! Error types for tool protocol domain validation.

use super::ConnectionState;
use thiserror::Error;

/// Errors returned while constructing tool protocol domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolProtocolDomainError {
    /// The stdio command is empty.
    #[error("stdio command must not be empty")]
    EmptyStdioCommand,

    /// The stdio working directory is empty after trimming.
    #[error("stdio working directory must not be empty when provided")]
    EmptyWorkingDirectory,

    /// The HTTP endpoint is empty.
    #[error("HTTP endpoint must not be empty")]
    EmptyHttpEndpoint,

    /// The HTTP endpoint does not have an `http://` or `https://` prefix.
    #[error("HTTP endpoint '{0}' must start with 'http://' or 'https://'")]
    InvalidHttpEndpoint(String),

    /// A tool name is empty after trimming.
    #[error("tool name must not be empty")]
    EmptyToolName,

    /// The connection state change is not permitted.
    #[error("invalid connection transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: ConnectionState,
        /// Requested state.
        to: ConnectionState,
    },
}

/// Error returned while parsing connection states from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown connection state: {0}")]
pub struct ParseConnectionStateError(pub String);
