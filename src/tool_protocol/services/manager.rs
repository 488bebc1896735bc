//! Connection lifecycle, call dispatch, and reconnection.

use crate::bus::services::ControlChannel;
use crate::cancel::{self, CancellationToken};
use crate::config::ToolSettings;
use crate::error::{Classify, ErrorClass};
use crate::retry::{BackoffPolicy, FullJitter, JitterSource, Sleeper, TokioSleeper};
use crate::tool_protocol::domain::{
    CallPolicy, ConnectionId, ConnectionState, ConnectionStateEvent, PersistedConnectionData,
    ServerAddress, ToolCallResult, ToolConnection, ToolProtocolDomainError, ToolSchema,
};
use crate::tool_protocol::ports::{SessionError, ToolConnector, ToolSession};
use mockable::Clock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use thiserror::Error;
use tokio::sync::watch;

/// A tool call addressed to one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeRequest {
    connection_id: ConnectionId,
    tool: String,
    arguments: Value,
    policy: Option<CallPolicy>,
}

impl InvokeRequest {
    /// Creates a call using the manager's default policy.
    #[must_use]
    pub fn new(connection_id: ConnectionId, tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            connection_id,
            tool: tool.into(),
            arguments,
            policy: None,
        }
    }

    /// Chooses what happens when the connection is recovering.
    #[must_use]
    pub const fn with_policy(mut self, policy: CallPolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

/// Service-level errors for the tool client manager.
#[derive(Debug, Clone, Error)]
pub enum ToolClientError {
    /// Domain validation or transition rules rejected the request.
    #[error(transparent)]
    Domain(#[from] ToolProtocolDomainError),

    /// No connection has the given identifier.
    #[error("unknown tool connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The server did not advertise the tool.
    #[error("tool '{tool}' not found on connection {connection_id}")]
    ToolNotFound {
        /// Connection the call targeted.
        connection_id: ConnectionId,
        /// Requested tool name.
        tool: String,
    },

    /// Opening the session or the handshake failed.
    #[error("handshake with connection {connection_id} failed: {source}")]
    HandshakeError {
        /// Connection being established.
        connection_id: ConnectionId,
        /// Underlying session error.
        source: SessionError,
    },

    /// The server chose a protocol revision this client does not speak.
    #[error("connection {connection_id} negotiated unsupported protocol version '{version}'")]
    UnsupportedProtocolVersion {
        /// Connection being established.
        connection_id: ConnectionId,
        /// Version the server answered with.
        version: String,
    },

    /// The connection is disconnected and must be re-established explicitly.
    #[error("connection {connection_id} is not ready ({state})")]
    ConnectionNotReady {
        /// Connection the call targeted.
        connection_id: ConnectionId,
        /// State observed.
        state: ConnectionState,
    },

    /// The connection is recovering and the call chose to fail fast.
    #[error("connection {connection_id} is unavailable ({state})")]
    ConnectionUnavailable {
        /// Connection the call targeted.
        connection_id: ConnectionId,
        /// State observed.
        state: ConnectionState,
    },

    /// Too many calls are already waiting for the connection.
    #[error("call queue for connection {connection_id} is full ({depth} waiting)")]
    QueueFull {
        /// Connection the call targeted.
        connection_id: ConnectionId,
        /// Configured queue depth.
        depth: usize,
    },

    /// The operation is not allowed in the connection's current state.
    #[error("operation not allowed on connection {connection_id} in state {state}")]
    InvalidState {
        /// Connection the operation targeted.
        connection_id: ConnectionId,
        /// State observed.
        state: ConnectionState,
    },

    /// The transport failed during a call; reconnection has been scheduled.
    #[error("transport fault on connection {connection_id}: {source}")]
    Transport {
        /// Connection the call targeted.
        connection_id: ConnectionId,
        /// Underlying session error.
        source: SessionError,
    },

    /// The tool ran and reported its own failure.
    #[error("tool '{tool}' on connection {connection_id} reported an error")]
    ToolError {
        /// Connection the call targeted.
        connection_id: ConnectionId,
        /// Tool that failed.
        tool: String,
        /// Result as returned by the server.
        result: Box<ToolCallResult>,
    },

    /// The server rejected the request at the protocol level.
    #[error("connection {connection_id} rejected the call: {source}")]
    Rejected {
        /// Connection the call targeted.
        connection_id: ConnectionId,
        /// Underlying session error.
        source: SessionError,
    },

    /// The configured connector cannot reach this kind of address.
    #[error("no connector for server address {0}")]
    UnsupportedAddress(String),

    /// The caller cancelled before the operation completed.
    #[error("operation on connection {0} cancelled")]
    Cancelled(ConnectionId),

    /// Internal state lock was poisoned.
    #[error("tool client lock poisoned")]
    LockPoisoned,
}

impl Classify for ToolClientError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Domain(ToolProtocolDomainError::InvalidTransition { .. })
            | Self::ConnectionNotReady { .. }
            | Self::InvalidState { .. } => ErrorClass::Conflict,
            Self::Domain(_)
            | Self::UnknownConnection(_)
            | Self::ToolNotFound { .. }
            | Self::UnsupportedAddress(_) => ErrorClass::Validation,
            Self::HandshakeError { source, .. } if source.is_transport() => {
                ErrorClass::Unavailable
            }
            Self::ConnectionUnavailable { .. } | Self::QueueFull { .. } | Self::Transport { .. } => {
                ErrorClass::Unavailable
            }
            Self::HandshakeError { .. }
            | Self::UnsupportedProtocolVersion { .. }
            | Self::ToolError { .. }
            | Self::Rejected { .. } => ErrorClass::Fatal,
            Self::Cancelled(_) => ErrorClass::Cancelled,
            Self::LockPoisoned => ErrorClass::Internal,
        }
    }

    fn entity_id(&self) -> Option<String> {
        match self {
            Self::UnknownConnection(connection_id)
            | Self::Cancelled(connection_id)
            | Self::ToolNotFound { connection_id, .. }
            | Self::HandshakeError { connection_id, .. }
            | Self::UnsupportedProtocolVersion { connection_id, .. }
            | Self::ConnectionNotReady { connection_id, .. }
            | Self::ConnectionUnavailable { connection_id, .. }
            | Self::QueueFull { connection_id, .. }
            | Self::InvalidState { connection_id, .. }
            | Self::Transport { connection_id, .. }
            | Self::ToolError { connection_id, .. }
            | Self::Rejected { connection_id, .. } => Some(connection_id.to_string()),
            Self::Domain(_) | Self::UnsupportedAddress(_) | Self::LockPoisoned => None,
        }
    }
}

/// Result type for tool client operations.
pub type ToolClientResult<T> = Result<T, ToolClientError>;

struct SlotState {
    connection: ToolConnection,
    session: Option<Arc<dyn ToolSession>>,
    generation: u64,
    waiters: usize,
    recovery: Option<CancellationToken>,
}

/// One managed connection. The watch channel mirrors the state so queued
/// callers can wait without holding the lock.
struct Slot {
    state: Mutex<SlotState>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Slot {
    fn new(connection: ToolConnection) -> Self {
        let (state_tx, _) = watch::channel(connection.state());
        Self {
            state: Mutex::new(SlotState {
                connection,
                session: None,
                generation: 0,
                waiters: 0,
                recovery: None,
            }),
            state_tx,
        }
    }

    fn lock(&self) -> ToolClientResult<MutexGuard<'_, SlotState>> {
        self.state.lock().map_err(|_| ToolClientError::LockPoisoned)
    }
}

/// Holds a place in a connection's call queue until dropped.
struct QueueTicket {
    slot: Arc<Slot>,
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        match self.slot.lock() {
            Ok(mut state) => state.waiters = state.waiters.saturating_sub(1),
            Err(err) => tracing::error!(error = %err, "queued call could not leave the queue"),
        }
    }
}

struct Established {
    session: Arc<dyn ToolSession>,
    version: String,
    tools: Vec<ToolSchema>,
}

enum HandshakeFailure {
    Session(SessionError),
    UnsupportedVersion(String),
}

impl HandshakeFailure {
    fn into_error(self, connection_id: ConnectionId) -> ToolClientError {
        match self {
            Self::Session(source) => ToolClientError::HandshakeError {
                connection_id,
                source,
            },
            Self::UnsupportedVersion(version) => ToolClientError::UnsupportedProtocolVersion {
                connection_id,
                version,
            },
        }
    }
}

enum RecoveryStep {
    Ready,
    Retry,
    Abandon(Option<Arc<dyn ToolSession>>),
}

/// Everything a background reconnection loop needs.
struct Link<C> {
    connector: Arc<dyn ToolConnector>,
    control: Arc<ControlChannel>,
    clock: Arc<C>,
    versions: Arc<[String]>,
    backoff: BackoffPolicy,
    attempt_ceiling: u32,
    jitter: Arc<dyn JitterSource>,
    sleeper: Arc<dyn Sleeper>,
}

impl<C> Clone for Link<C> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            control: Arc::clone(&self.control),
            clock: Arc::clone(&self.clock),
            versions: Arc::clone(&self.versions),
            backoff: self.backoff,
            attempt_ceiling: self.attempt_ceiling,
            jitter: Arc::clone(&self.jitter),
            sleeper: Arc::clone(&self.sleeper),
        }
    }
}

async fn close_quietly(session: &dyn ToolSession) {
    if let Err(err) = session.close().await {
        tracing::debug!(error = %err, "tool session close failed");
    }
}

impl<C> Link<C>
where
    C: Clock + Send + Sync + 'static,
{
    /// Applies a state change to the slot and publishes it.
    fn move_to(
        &self,
        slot: &Slot,
        state: &mut SlotState,
        target: ConnectionState,
    ) -> ToolClientResult<()> {
        let event = state.connection.transition_to(target, self.clock.as_ref())?;
        self.announce(slot, event)
    }

    fn announce(&self, slot: &Slot, event: ConnectionStateEvent) -> ToolClientResult<()> {
        slot.state_tx.send_replace(event.to);
        tracing::debug!(
            connection_id = %event.connection_id,
            from = ?event.from,
            to = %event.to,
            "connection state changed"
        );
        self.control
            .connections()
            .publish(event, self.clock.utc())
            .map_err(|_| ToolClientError::LockPoisoned)?;
        Ok(())
    }

    fn install(
        &self,
        slot: &Slot,
        state: &mut SlotState,
        established: Established,
    ) -> Result<(), (ToolClientError, Arc<dyn ToolSession>)> {
        let Established {
            session,
            version,
            tools,
        } = established;
        match state
            .connection
            .mark_ready(version, tools, self.clock.as_ref())
        {
            Ok(event) => {
                state.session = Some(Arc::clone(&session));
                state.generation = state.generation.saturating_add(1);
                if let Err(err) = self.announce(slot, event) {
                    state.session = None;
                    return Err((err, session));
                }
                Ok(())
            }
            Err(err) => Err((err.into(), session)),
        }
    }

    async fn handshake(&self, address: &ServerAddress) -> Result<Established, HandshakeFailure> {
        let session = self
            .connector
            .open(address)
            .await
            .map_err(HandshakeFailure::Session)?;
        match self.negotiate(session.as_ref()).await {
            Ok((version, tools)) => Ok(Established {
                session,
                version,
                tools,
            }),
            Err(failure) => {
                close_quietly(session.as_ref()).await;
                Err(failure)
            }
        }
    }

    async fn negotiate(
        &self,
        session: &dyn ToolSession,
    ) -> Result<(String, Vec<ToolSchema>), HandshakeFailure> {
        let version = session
            .initialize(&self.versions)
            .await
            .map_err(HandshakeFailure::Session)?;
        if !self.versions.iter().any(|supported| *supported == version) {
            return Err(HandshakeFailure::UnsupportedVersion(version));
        }
        let tools = session
            .list_tools()
            .await
            .map_err(HandshakeFailure::Session)?;
        Ok((version, tools))
    }

    /// Retries the handshake with backoff until it succeeds, the ceiling is
    /// reached, or `token` fires because the connection was closed.
    async fn recover(
        self,
        slot: Arc<Slot>,
        token: CancellationToken,
        stale: Option<Arc<dyn ToolSession>>,
    ) {
        if let Some(session) = stale {
            close_quietly(session.as_ref()).await;
        }

        for attempt in 0..self.attempt_ceiling {
            let delay = self.backoff.delay(attempt, self.jitter.as_ref());
            if cancel::guard(&token, self.sleeper.sleep(delay)).await.is_err() {
                return;
            }

            let address = {
                let Ok(mut state) = slot.lock() else {
                    tracing::error!("connection lock poisoned; reconnection abandoned");
                    return;
                };
                if token.is_cancelled() {
                    return;
                }
                if let Err(err) = self.move_to(&slot, &mut state, ConnectionState::Connecting) {
                    tracing::debug!(error = %err, "reconnection abandoned");
                    return;
                }
                state.connection.address().clone()
            };

            let Ok(outcome) = cancel::guard(&token, self.handshake(&address)).await else {
                return;
            };

            let step = {
                let Ok(mut state) = slot.lock() else {
                    tracing::error!("connection lock poisoned; reconnection abandoned");
                    return;
                };
                let connection_id = state.connection.id();
                if token.is_cancelled() {
                    RecoveryStep::Abandon(outcome.ok().map(|established| established.session))
                } else {
                    match outcome {
                        Ok(established) => match self.install(&slot, &mut state, established) {
                            Ok(()) => {
                                state.recovery = None;
                                tracing::info!(
                                    connection_id = %connection_id,
                                    attempt = attempt.saturating_add(1),
                                    "tool connection recovered"
                                );
                                RecoveryStep::Ready
                            }
                            Err((err, session)) => {
                                tracing::debug!(error = %err, "reconnection superseded");
                                RecoveryStep::Abandon(Some(session))
                            }
                        },
                        Err(failure) => {
                            let error = failure.into_error(connection_id);
                            tracing::warn!(
                                connection_id = %connection_id,
                                attempt = attempt.saturating_add(1),
                                error = %error,
                                "reconnection attempt failed"
                            );
                            state.connection.record_failed_attempt();
                            match self.move_to(&slot, &mut state, ConnectionState::Degraded) {
                                Ok(()) => RecoveryStep::Retry,
                                Err(_) => RecoveryStep::Abandon(None),
                            }
                        }
                    }
                }
            };

            match step {
                RecoveryStep::Ready => return,
                RecoveryStep::Retry => {}
                RecoveryStep::Abandon(leftover) => {
                    if let Some(session) = leftover {
                        close_quietly(session.as_ref()).await;
                    }
                    return;
                }
            }
        }

        let Ok(mut state) = slot.lock() else {
            tracing::error!("connection lock poisoned; reconnection abandoned");
            return;
        };
        if token.is_cancelled() {
            return;
        }
        state.recovery = None;
        let connection_id = state.connection.id();
        if let Err(err) = self.move_to(&slot, &mut state, ConnectionState::Disconnected) {
            tracing::debug!(error = %err, "could not mark connection disconnected");
            return;
        }
        tracing::warn!(
            connection_id = %connection_id,
            attempts = self.attempt_ceiling,
            "reconnection ceiling reached; connection disconnected"
        );
    }
}

/// Owns every tool server connection.
///
/// Each connection lives behind its own lock. Calls never hold it while
/// talking to the server, and a transport fault on a call hands the
/// connection to a background reconnection loop.
pub struct ToolClientManager<C>
where
    C: Clock + Send + Sync + 'static,
{
    connections: RwLock<HashMap<ConnectionId, Arc<Slot>>>,
    link: Link<C>,
    queue_depth: usize,
    default_policy: CallPolicy,
}

impl<C> ToolClientManager<C>
where
    C: Clock + Send + Sync + 'static,
{
    /// Creates a manager using full-jitter backoff on the tokio timer.
    #[must_use]
    pub fn new(
        settings: &ToolSettings,
        connector: Arc<dyn ToolConnector>,
        control: Arc<ControlChannel>,
        clock: Arc<C>,
    ) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            link: Link {
                connector,
                control,
                clock,
                versions: settings.supported_protocol_versions.clone().into(),
                backoff: settings.backoff.policy(),
                attempt_ceiling: settings.reconnect_attempts,
                jitter: Arc::new(FullJitter),
                sleeper: Arc::new(TokioSleeper),
            },
            queue_depth: settings.queue_depth,
            default_policy: settings.default_policy,
        }
    }

    /// Replaces the jitter source used for reconnection delays.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.link.jitter = jitter;
        self
    }

    /// Replaces the sleeper used for reconnection delays.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.link.sleeper = sleeper;
        self
    }

    /// Connects to a tool server, negotiates the protocol version, and
    /// discovers its tools.
    ///
    /// # Errors
    ///
    /// Returns [`ToolClientError::UnsupportedAddress`] when the connector
    /// cannot reach the address, [`ToolClientError::HandshakeError`] or
    /// [`ToolClientError::UnsupportedProtocolVersion`] when the server cannot
    /// be established, and [`ToolClientError::Cancelled`] when `cancel`
    /// fires first. A failed connection is neither retained nor announced.
    pub async fn connect(
        &self,
        address: ServerAddress,
        cancel: &CancellationToken,
    ) -> ToolClientResult<ToolConnection> {
        self.check_supported(&address)?;
        let connection = ToolConnection::new(address, self.link.clock.as_ref());
        let connection_id = connection.id();
        tracing::info!(
            connection_id = %connection_id,
            address = %connection.address(),
            "connecting tool server"
        );

        let handshake = cancel::guard(cancel, self.link.handshake(connection.address())).await;
        let established = match handshake {
            Ok(Ok(established)) => established,
            Ok(Err(failure)) => {
                let error = failure.into_error(connection_id);
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %error,
                    "tool connection handshake failed"
                );
                return Err(error);
            }
            Err(_) => return Err(ToolClientError::Cancelled(connection_id)),
        };

        let session = Arc::clone(&established.session);
        match self.adopt(connection, established) {
            Ok(ready) => {
                tracing::info!(
                    connection_id = %connection_id,
                    protocol_version = ready.protocol_version().unwrap_or_default(),
                    tools = ready.tools().len(),
                    "tool connection ready"
                );
                Ok(ready)
            }
            Err(err) => {
                close_quietly(session.as_ref()).await;
                self.forget(connection_id)?;
                Err(err)
            }
        }
    }

    /// Registers a connection whose handshake already succeeded and
    /// announces it as `disconnected -> connecting -> ready`.
    fn adopt(
        &self,
        connection: ToolConnection,
        established: Established,
    ) -> ToolClientResult<ToolConnection> {
        let slot = self.insert(connection)?;
        let mut state = slot.lock()?;
        self.link
            .move_to(&slot, &mut state, ConnectionState::Connecting)?;
        self.link
            .install(&slot, &mut state, established)
            .map_err(|(err, _)| err)?;
        Ok(state.connection.clone())
    }

    fn check_supported(&self, address: &ServerAddress) -> ToolClientResult<()> {
        if self.link.connector.supports(address) {
            Ok(())
        } else {
            Err(ToolClientError::UnsupportedAddress(address.to_string()))
        }
    }

    /// Re-establishes a `disconnected` connection.
    ///
    /// # Errors
    ///
    /// Returns [`ToolClientError::InvalidState`] unless the connection is
    /// `disconnected`, and the handshake errors of
    /// [`ToolClientManager::connect`]. The connection stays `disconnected`
    /// on failure.
    pub async fn reconnect(
        &self,
        connection_id: ConnectionId,
        cancel: &CancellationToken,
    ) -> ToolClientResult<ToolConnection> {
        let slot = self.slot(connection_id)?;
        self.open_session(&slot, cancel).await
    }

    /// Calls a tool.
    ///
    /// A connection that is `degraded` or `connecting` either fails the call
    /// with [`ToolClientError::ConnectionUnavailable`] or queues it until the
    /// connection is ready, according to the call policy. No request reaches
    /// the server unless the connection is `ready`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolClientError`] for unknown connections or tools, for
    /// connections that are not ready, for transport faults (which start
    /// reconnection), for tool-declared errors, and on cancellation.
    pub async fn invoke(
        &self,
        request: InvokeRequest,
        cancel: &CancellationToken,
    ) -> ToolClientResult<ToolCallResult> {
        let InvokeRequest {
            connection_id,
            tool,
            arguments,
            policy,
        } = request;
        let call_policy = policy.unwrap_or(self.default_policy);
        let slot = self.slot(connection_id)?;
        let mut ticket: Option<QueueTicket> = None;

        let (session, generation) = loop {
            let mut updates = slot.state_tx.subscribe();
            {
                let mut state = slot.lock()?;
                let observed = state.connection.state();
                if observed == ConnectionState::Disconnected {
                    return Err(ToolClientError::ConnectionNotReady {
                        connection_id,
                        state: observed,
                    });
                }
                if state.connection.tool(&tool).is_none() {
                    return Err(ToolClientError::ToolNotFound {
                        connection_id,
                        tool,
                    });
                }
                if observed.is_ready() {
                    let Some(session) = state.session.clone() else {
                        return Err(ToolClientError::ConnectionNotReady {
                            connection_id,
                            state: observed,
                        });
                    };
                    break (session, state.generation);
                }
                if call_policy == CallPolicy::FailFast {
                    return Err(ToolClientError::ConnectionUnavailable {
                        connection_id,
                        state: observed,
                    });
                }
                if ticket.is_none() {
                    if state.waiters >= self.queue_depth {
                        return Err(ToolClientError::QueueFull {
                            connection_id,
                            depth: self.queue_depth,
                        });
                    }
                    state.waiters = state.waiters.saturating_add(1);
                    ticket = Some(QueueTicket {
                        slot: Arc::clone(&slot),
                    });
                }
            }

            match cancel::guard(cancel, updates.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    return Err(ToolClientError::UnknownConnection(connection_id));
                }
                Err(_) => return Err(ToolClientError::Cancelled(connection_id)),
            }
        };
        drop(ticket);

        tracing::debug!(connection_id = %connection_id, tool = %tool, "invoking tool");
        let Ok(outcome) = cancel::guard(cancel, session.call_tool(&tool, arguments)).await else {
            return Err(ToolClientError::Cancelled(connection_id));
        };

        match outcome {
            Ok(result) if result.is_error => Err(ToolClientError::ToolError {
                connection_id,
                tool,
                result: Box::new(result),
            }),
            Ok(result) => {
                slot.lock()?
                    .connection
                    .record_success(self.link.clock.as_ref());
                Ok(result)
            }
            Err(source) if source.is_transport() => {
                tracing::warn!(
                    connection_id = %connection_id,
                    tool = %tool,
                    error = %source,
                    "transport fault during tool call"
                );
                self.degrade(&slot, generation);
                Err(ToolClientError::Transport {
                    connection_id,
                    source,
                })
            }
            Err(source) => Err(ToolClientError::Rejected {
                connection_id,
                source,
            }),
        }
    }

    /// Closes a connection from any state and stops pending reconnection.
    /// Closing a `disconnected` connection is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ToolClientError::UnknownConnection`] when the id is absent.
    pub async fn close(&self, connection_id: ConnectionId) -> ToolClientResult<ToolConnection> {
        let slot = self.slot(connection_id)?;
        let (session, snapshot) = {
            let mut state = slot.lock()?;
            if let Some(token) = state.recovery.take() {
                token.cancel();
            }
            if state.connection.state() != ConnectionState::Disconnected {
                self.link
                    .move_to(&slot, &mut state, ConnectionState::Disconnected)?;
            }
            state.generation = state.generation.saturating_add(1);
            (state.session.take(), state.connection.clone())
        };
        if let Some(open) = session {
            close_quietly(open.as_ref()).await;
        }
        tracing::info!(connection_id = %connection_id, "tool connection closed");
        Ok(snapshot)
    }

    /// Returns a snapshot of one connection.
    ///
    /// # Errors
    ///
    /// Returns [`ToolClientError::UnknownConnection`] when the id is absent.
    pub fn status(&self, connection_id: ConnectionId) -> ToolClientResult<ToolConnection> {
        let slot = self.slot(connection_id)?;
        let state = slot.lock()?;
        Ok(state.connection.clone())
    }

    /// Returns a receiver that observes the connection's state.
    ///
    /// # Errors
    ///
    /// Returns [`ToolClientError::UnknownConnection`] when the id is absent.
    pub fn watch(
        &self,
        connection_id: ConnectionId,
    ) -> ToolClientResult<watch::Receiver<ConnectionState>> {
        Ok(self.slot(connection_id)?.state_tx.subscribe())
    }

    /// Returns how many calls are waiting for the connection to recover.
    ///
    /// # Errors
    ///
    /// Returns [`ToolClientError::UnknownConnection`] when the id is absent.
    pub fn queued_calls(&self, connection_id: ConnectionId) -> ToolClientResult<usize> {
        Ok(self.slot(connection_id)?.lock()?.waiters)
    }

    /// Returns snapshots of every connection in creation order.
    ///
    /// # Errors
    ///
    /// Returns [`ToolClientError::LockPoisoned`] when the table lock is
    /// poisoned.
    pub fn list(&self) -> ToolClientResult<Vec<ToolConnection>> {
        let slots: Vec<Arc<Slot>> = self
            .connections
            .read()
            .map_err(|_| ToolClientError::LockPoisoned)?
            .values()
            .cloned()
            .collect();
        let mut snapshots = slots
            .iter()
            .map(|slot| slot.lock().map(|state| state.connection.clone()))
            .collect::<ToolClientResult<Vec<ToolConnection>>>()?;
        snapshots.sort_by_key(|connection| (connection.created_at(), connection.id()));
        Ok(snapshots)
    }

    /// Re-creates persisted connections and tries to establish each once.
    /// Connections that fail to come up stay `disconnected`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolClientError::LockPoisoned`] when the table lock is
    /// poisoned.
    pub async fn restore(
        &self,
        persisted: Vec<PersistedConnectionData>,
        cancel: &CancellationToken,
    ) -> ToolClientResult<Vec<ToolConnection>> {
        let mut restored = Vec::with_capacity(persisted.len());
        for data in persisted {
            let connection_id = data.id;
            let slot = self.insert(ToolConnection::from_persisted(data))?;
            match self.open_session(&slot, cancel).await {
                Ok(connection) => restored.push(connection),
                Err(err) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        error = %err,
                        "restored tool connection left disconnected"
                    );
                    restored.push(slot.lock()?.connection.clone());
                }
            }
        }
        Ok(restored)
    }

    fn slot(&self, connection_id: ConnectionId) -> ToolClientResult<Arc<Slot>> {
        self.connections
            .read()
            .map_err(|_| ToolClientError::LockPoisoned)?
            .get(&connection_id)
            .cloned()
            .ok_or(ToolClientError::UnknownConnection(connection_id))
    }

    fn insert(&self, connection: ToolConnection) -> ToolClientResult<Arc<Slot>> {
        let connection_id = connection.id();
        let slot = Arc::new(Slot::new(connection));
        self.connections
            .write()
            .map_err(|_| ToolClientError::LockPoisoned)?
            .insert(connection_id, Arc::clone(&slot));
        self.link.announce(
            &slot,
            ConnectionStateEvent {
                connection_id,
                from: None,
                to: ConnectionState::Disconnected,
            },
        )?;
        Ok(slot)
    }

    fn forget(&self, connection_id: ConnectionId) -> ToolClientResult<()> {
        self.connections
            .write()
            .map_err(|_| ToolClientError::LockPoisoned)?
            .remove(&connection_id);
        Ok(())
    }

    /// Runs one handshake for a `disconnected` connection.
    async fn open_session(
        &self,
        slot: &Arc<Slot>,
        cancel: &CancellationToken,
    ) -> ToolClientResult<ToolConnection> {
        let (connection_id, address) = {
            let mut state = slot.lock()?;
            let connection_id = state.connection.id();
            let observed = state.connection.state();
            if observed != ConnectionState::Disconnected {
                return Err(ToolClientError::InvalidState {
                    connection_id,
                    state: observed,
                });
            }
            self.check_supported(state.connection.address())?;
            self.link
                .move_to(slot, &mut state, ConnectionState::Connecting)?;
            (connection_id, state.connection.address().clone())
        };

        let outcome = cancel::guard(cancel, self.link.handshake(&address)).await;

        let (result, leftover) = {
            let mut state = slot.lock()?;
            match outcome {
                Ok(Ok(established)) => match self.link.install(slot, &mut state, established) {
                    Ok(()) => (Ok(state.connection.clone()), None),
                    Err((ToolClientError::LockPoisoned, session)) => {
                        (Err(ToolClientError::LockPoisoned), Some(session))
                    }
                    Err((_, session)) => (
                        Err(ToolClientError::InvalidState {
                            connection_id,
                            state: state.connection.state(),
                        }),
                        Some(session),
                    ),
                },
                Ok(Err(failure)) => {
                    self.abort_connecting(slot, &mut state);
                    (Err(failure.into_error(connection_id)), None)
                }
                Err(_) => {
                    self.abort_connecting(slot, &mut state);
                    (Err(ToolClientError::Cancelled(connection_id)), None)
                }
            }
        };
        if let Some(session) = leftover {
            close_quietly(session.as_ref()).await;
        }

        match &result {
            Ok(connection) => tracing::info!(
                connection_id = %connection_id,
                protocol_version = connection.protocol_version().unwrap_or_default(),
                tools = connection.tools().len(),
                "tool connection ready"
            ),
            Err(err) => tracing::warn!(
                connection_id = %connection_id,
                error = %err,
                "tool connection handshake failed"
            ),
        }
        result
    }

    fn abort_connecting(&self, slot: &Slot, state: &mut SlotState) {
        if state.connection.state() != ConnectionState::Connecting {
            return;
        }
        if let Err(err) = self.link.move_to(slot, state, ConnectionState::Disconnected) {
            tracing::debug!(error = %err, "could not reset connecting state");
        }
    }

    /// Moves a ready connection to `degraded` and starts reconnection, unless
    /// the session that failed has already been replaced.
    fn degrade(&self, slot: &Arc<Slot>, generation: u64) {
        let (token, stale) = {
            let Ok(mut state) = slot.lock() else {
                tracing::error!("connection lock poisoned; not degrading");
                return;
            };
            if state.generation != generation || !state.connection.state().is_ready() {
                return;
            }
            if let Err(err) = self
                .link
                .move_to(slot, &mut state, ConnectionState::Degraded)
            {
                tracing::debug!(error = %err, "could not degrade connection");
                return;
            }
            let token = CancellationToken::new();
            state.recovery = Some(token.clone());
            (token, state.session.take())
        };
        tokio::spawn(self.link.clone().recover(Arc::clone(slot), token, stale));
    }
}
