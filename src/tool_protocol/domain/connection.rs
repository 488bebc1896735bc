//! Connection state machine and the connection aggregate.

use super::{
    ConnectionId, ParseConnectionStateError, ServerAddress, ToolProtocolDomainError, ToolSchema,
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// State of a managed tool server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session. Needs an explicit connect or reconnect.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Calls may be issued.
    Ready,
    /// A transport fault was seen; reconnection is scheduled.
    Degraded,
}

impl ConnectionState {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
        }
    }

    /// Returns whether calls may be issued.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Returns whether transition to `target` is allowed.
    ///
    /// Every state may move to `disconnected` on close.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (_, Self::Disconnected)
                | (Self::Disconnected | Self::Degraded, Self::Connecting)
                | (Self::Connecting, Self::Ready | Self::Degraded)
                | (Self::Ready, Self::Degraded)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ConnectionState {
    type Error = ParseConnectionStateError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "disconnected" => Ok(Self::Disconnected),
            "connecting" => Ok(Self::Connecting),
            "ready" => Ok(Self::Ready),
            "degraded" => Ok(Self::Degraded),
            _ => Err(ParseConnectionStateError(value.to_owned())),
        }
    }
}

/// What a call does when its connection is recovering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPolicy {
    /// Fail immediately with `ConnectionUnavailable`.
    #[default]
    FailFast,
    /// Wait for the connection to become ready, up to a bounded queue depth.
    Queue,
}

/// State change published on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStateEvent {
    /// Connection that changed.
    pub connection_id: ConnectionId,
    /// Previous state, absent when the connection is first created.
    pub from: Option<ConnectionState>,
    /// New state.
    pub to: ConnectionState,
}

/// A managed link to one tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConnection {
    id: ConnectionId,
    address: ServerAddress,
    protocol_version: Option<String>,
    tools: BTreeMap<String, ToolSchema>,
    state: ConnectionState,
    reconnect_attempts: u32,
    last_success_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Parameter object for reconstructing a persisted connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedConnectionData {
    /// Persisted identifier.
    pub id: ConnectionId,
    /// Persisted server address.
    pub address: ServerAddress,
    /// Persisted creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ToolConnection {
    /// Creates a disconnected connection record for `address`.
    #[must_use]
    pub fn new(address: ServerAddress, clock: &impl Clock) -> Self {
        let timestamp = clock.utc();
        Self {
            id: ConnectionId::new(),
            address,
            protocol_version: None,
            tools: BTreeMap::new(),
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            last_success_at: None,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Reconstructs a connection from its persisted configuration.
    ///
    /// Session-derived fields (version, tools, state) are transient and start
    /// empty and `disconnected`.
    #[must_use]
    pub fn from_persisted(data: PersistedConnectionData) -> Self {
        Self {
            id: data.id,
            address: data.address,
            protocol_version: None,
            tools: BTreeMap::new(),
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            last_success_at: None,
            created_at: data.created_at,
            updated_at: data.created_at,
        }
    }

    /// Returns the persisted configuration of this connection.
    #[must_use]
    pub fn to_persisted(&self) -> PersistedConnectionData {
        PersistedConnectionData {
            id: self.id,
            address: self.address.clone(),
            created_at: self.created_at,
        }
    }

    /// Returns the connection identifier.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the server address.
    #[must_use]
    pub const fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Returns the negotiated protocol version.
    #[must_use]
    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    /// Returns the discovered tools keyed by name.
    #[must_use]
    pub const fn tools(&self) -> &BTreeMap<String, ToolSchema> {
        &self.tools
    }

    /// Returns a discovered tool.
    #[must_use]
    pub fn tool(&self, name: &str) -> Option<&ToolSchema> {
        self.tools.get(name)
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns consecutive failed reconnection attempts.
    #[must_use]
    pub const fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Returns the time of the last successful call.
    #[must_use]
    pub const fn last_success_at(&self) -> Option<DateTime<Utc>> {
        self.last_success_at
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the latest change timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Moves to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolProtocolDomainError::InvalidTransition`] when the state
    /// machine forbids the change.
    pub fn transition_to(
        &mut self,
        target: ConnectionState,
        clock: &impl Clock,
    ) -> Result<ConnectionStateEvent, ToolProtocolDomainError> {
        if !self.state.can_transition_to(target) {
            return Err(ToolProtocolDomainError::InvalidTransition {
                from: self.state,
                to: target,
            });
        }
        let from = self.state;
        self.state = target;
        if target == ConnectionState::Disconnected {
            self.protocol_version = None;
        }
        self.touch(clock);
        Ok(ConnectionStateEvent {
            connection_id: self.id,
            from: Some(from),
            to: target,
        })
    }

    /// Installs the result of a successful handshake and moves to `ready`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolProtocolDomainError::InvalidTransition`] unless the
    /// connection is `connecting`.
    pub fn mark_ready(
        &mut self,
        protocol_version: String,
        tools: Vec<ToolSchema>,
        clock: &impl Clock,
    ) -> Result<ConnectionStateEvent, ToolProtocolDomainError> {
        let event = self.transition_to(ConnectionState::Ready, clock)?;
        self.protocol_version = Some(protocol_version);
        self.tools = tools
            .into_iter()
            .map(|tool| (tool.name().to_owned(), tool))
            .collect();
        self.reconnect_attempts = 0;
        Ok(event)
    }

    /// Records a failed reconnection attempt.
    pub const fn record_failed_attempt(&mut self) {
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
    }

    /// Records a successful call.
    pub fn record_success(&mut self, clock: &impl Clock) {
        let timestamp = clock.utc();
        self.last_success_at = Some(timestamp);
        self.updated_at = timestamp;
    }

    fn touch(&mut self, clock: &impl Clock) {
        self.updated_at = clock.utc();
    }
}
