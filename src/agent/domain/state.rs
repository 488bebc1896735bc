//! Agent lifecycle states and the events that move between them.

use super::ParseAgentStateError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Registered but not yet initialized.
    Created,
    /// Agent logic is starting up.
    Initializing,
    /// Ready to accept work.
    Idle,
    /// Working on a task.
    Running,
    /// Work suspended by request.
    Paused,
    /// Shutting down.
    Stopping,
    /// Gone for good.
    Terminated,
}

/// Event driving a lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// `created -> initializing`.
    Initialize,
    /// `initializing -> idle`.
    Ready,
    /// `idle -> running`.
    Start,
    /// `running -> idle`.
    Finish,
    /// `running -> paused`.
    Pause,
    /// `paused -> idle`.
    Resume,
    /// Any live state except `stopping` -> `stopping`.
    Stop,
    /// `stopping -> terminated`.
    Terminate,
}

impl AgentState {
    /// All lifecycle states in diagram order.
    pub const ALL: [Self; 7] = [
        Self::Created,
        Self::Initializing,
        Self::Idle,
        Self::Running,
        Self::Paused,
        Self::Stopping,
        Self::Terminated,
    ];

    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Terminated => "terminated",
        }
    }

    /// Returns the state reached by applying `event`, if legal.
    #[must_use]
    pub const fn apply(self, event: LifecycleEvent) -> Option<Self> {
        match (self, event) {
            (Self::Created, LifecycleEvent::Initialize) => Some(Self::Initializing),
            (Self::Initializing, LifecycleEvent::Ready) => Some(Self::Idle),
            (Self::Idle, LifecycleEvent::Start) => Some(Self::Running),
            (Self::Running, LifecycleEvent::Finish) => Some(Self::Idle),
            (Self::Running, LifecycleEvent::Pause) => Some(Self::Paused),
            (Self::Paused, LifecycleEvent::Resume) => Some(Self::Idle),
            (Self::Stopping, LifecycleEvent::Terminate) => Some(Self::Terminated),
            (Self::Stopping | Self::Terminated, LifecycleEvent::Stop) => None,
            (_, LifecycleEvent::Stop) => Some(Self::Stopping),
            _ => None,
        }
    }

    /// Returns whether a new registration may start in this state.
    #[must_use]
    pub const fn is_valid_initial(self) -> bool {
        !matches!(self, Self::Stopping | Self::Terminated)
    }

    /// Returns whether the agent has reached the terminal state.
    #[must_use]
    pub const fn is_terminated(self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for AgentState {
    type Error = ParseAgentStateError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == normalized)
            .ok_or_else(|| ParseAgentStateError(value.to_owned()))
    }
}

impl LifecycleEvent {
    /// Returns the canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Ready => "ready",
            Self::Start => "start",
            Self::Finish => "finish",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::Terminate => "terminate",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
