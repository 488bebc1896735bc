//! In-memory, fault-injectable tool server.
//!
//! Models a tool server without spawning processes. Faults can be scheduled
//! for handshakes and calls, and counters record how many requests actually
//! reached the server, which lets tests prove that a call was never issued.

use crate::tool_protocol::domain::{ServerAddress, ToolCallResult, ToolSchema};
use crate::tool_protocol::ports::{SessionError, SessionResult, ToolConnector, ToolSession};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// In-memory tool server and connector.
#[derive(Debug, Clone, Default)]
pub struct InMemoryToolConnector {
    state: Arc<Mutex<ServerState>>,
}

#[derive(Debug, Default)]
struct ServerState {
    tools: Vec<ToolSchema>,
    results: HashMap<String, ToolCallResult>,
    protocol_version: Option<String>,
    offline: bool,
    failing_handshakes: u32,
    failing_calls: u32,
    call_delay: Option<Duration>,
    handshakes: u64,
    calls: u64,
}

fn server_down() -> SessionError {
    SessionError::transport(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "tool server unreachable",
    ))
}

impl InMemoryToolConnector {
    /// Creates a server with no tools.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a server exposing `tools`. Calls echo their arguments.
    #[must_use]
    pub fn with_tools(tools: impl IntoIterator<Item = ToolSchema>) -> Self {
        let connector = Self::new();
        connector.lock().tools = tools.into_iter().collect();
        connector
    }

    /// Fixes the result returned for `tool`.
    pub fn set_result(&self, tool: impl Into<String>, result: ToolCallResult) {
        self.lock().results.insert(tool.into(), result);
    }

    /// Answers handshakes with `version` instead of the client's first offer.
    pub fn set_protocol_version(&self, version: impl Into<String>) {
        self.lock().protocol_version = Some(version.into());
    }

    /// Takes the server down or brings it back. While offline every handshake
    /// and call fails at the transport level.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Fails the next `count` handshakes at the transport level.
    pub fn fail_next_handshakes(&self, count: u32) {
        self.lock().failing_handshakes = count;
    }

    /// Fails the next `count` calls at the transport level.
    pub fn fail_next_calls(&self, count: u32) {
        self.lock().failing_calls = count;
    }

    /// Delays every call by `delay`.
    pub fn set_call_delay(&self, delay: Duration) {
        self.lock().call_delay = Some(delay);
    }

    /// Returns how many handshakes reached the server.
    #[must_use]
    pub fn handshake_count(&self) -> u64 {
        self.lock().handshakes
    }

    /// Returns how many calls reached the server.
    #[must_use]
    pub fn call_count(&self) -> u64 {
        self.lock().calls
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<ServerState>) -> MutexGuard<'_, ServerState> {
    state
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl ToolConnector for InMemoryToolConnector {
    async fn open(&self, _address: &ServerAddress) -> SessionResult<Arc<dyn ToolSession>> {
        let mut state = self.lock();
        state.handshakes = state.handshakes.saturating_add(1);
        if state.offline {
            return Err(server_down());
        }
        if state.failing_handshakes > 0 {
            state.failing_handshakes = state.failing_handshakes.saturating_sub(1);
            return Err(server_down());
        }
        Ok(Arc::new(InMemorySession {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Session opened by [`InMemoryToolConnector`].
#[derive(Debug)]
struct InMemorySession {
    state: Arc<Mutex<ServerState>>,
    closed: AtomicBool,
}

impl InMemorySession {
    fn ensure_open(&self) -> SessionResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::transport(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "session closed",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ToolSession for InMemorySession {
    async fn initialize(&self, supported_versions: &[String]) -> SessionResult<String> {
        self.ensure_open()?;
        let state = lock_state(&self.state);
        state
            .protocol_version
            .clone()
            .or_else(|| supported_versions.first().cloned())
            .ok_or_else(|| SessionError::Rejected {
                code: -32602,
                message: "no protocol version offered".to_owned(),
            })
    }

    async fn list_tools(&self) -> SessionResult<Vec<ToolSchema>> {
        self.ensure_open()?;
        Ok(lock_state(&self.state).tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> SessionResult<ToolCallResult> {
        self.ensure_open()?;
        let (delay, reply) = {
            let mut state = lock_state(&self.state);
            state.calls = state.calls.saturating_add(1);
            let outcome = if state.offline {
                Err(server_down())
            } else if state.failing_calls > 0 {
                state.failing_calls = state.failing_calls.saturating_sub(1);
                Err(server_down())
            } else {
                Ok(state.results.get(name).cloned().unwrap_or_else(|| {
                    ToolCallResult::success(json!([{ "type": "text", "text": arguments.to_string() }]))
                }))
            };
            (state.call_delay, outcome)
        };
        if let Some(pause) = delay {
            tokio::time::sleep(pause).await;
        }
        reply
    }

    async fn close(&self) -> SessionResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
