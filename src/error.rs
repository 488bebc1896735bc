//! Cross-component error taxonomy.
//!
//! Every component keeps its own `thiserror` enums. At the orchestrator
//! boundary they are folded into a single [`RuntimeError`] that records the
//! error class, the originating component, and the entity involved so
//! callers can decide whether to retry, re-query, or change the request.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Classification shared by all runtime errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed input rejected before any state change.
    Validation,
    /// Illegal state transition or a lost race; re-query state and decide.
    Conflict,
    /// A dependency is not reachable right now; the caller may retry.
    Unavailable,
    /// The dependency rejected the request; retrying unchanged will not help.
    Fatal,
    /// A suspending operation was cancelled before it completed.
    Cancelled,
    /// Classification was impossible; always logged before surfacing.
    Internal,
}

impl ErrorClass {
    /// Returns the canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::Unavailable => "unavailable",
            Self::Fatal => "fatal",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }

    /// Returns whether retrying the same request later may succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Runtime component an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// Agent registry and lifecycle state machine.
    Registry,
    /// Task router and delegation engine.
    Router,
    /// Inter-agent message bus.
    Bus,
    /// Tool protocol client manager.
    ToolClient,
    /// Model provider abstraction.
    Provider,
    /// Document persistence collaborator.
    Persistence,
    /// Composition root.
    Orchestrator,
}

impl Component {
    /// Returns the canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::Router => "router",
            Self::Bus => "bus",
            Self::ToolClient => "tool_client",
            Self::Provider => "provider",
            Self::Persistence => "persistence",
            Self::Orchestrator => "orchestrator",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Maps a component error onto the shared taxonomy.
pub trait Classify {
    /// Returns the error class.
    fn class(&self) -> ErrorClass;

    /// Returns the identifier of the entity the error concerns, if known.
    fn entity_id(&self) -> Option<String> {
        None
    }
}

/// Error surfaced across the runtime's external interface.
#[derive(Debug, Clone, Error)]
#[error("{component} {class} error{}: {source}", format_entity(.entity_id.as_deref()))]
pub struct RuntimeError {
    class: ErrorClass,
    component: Component,
    entity_id: Option<String>,
    #[source]
    source: Arc<dyn std::error::Error + Send + Sync>,
}

fn format_entity(entity_id: Option<&str>) -> String {
    entity_id.map_or_else(String::new, |id| format!(" on {id}"))
}

impl RuntimeError {
    /// Creates an error with an explicit class.
    pub fn new(
        class: ErrorClass,
        component: Component,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        let error = Self {
            class,
            component,
            entity_id: None,
            source: Arc::new(source),
        };
        if class == ErrorClass::Internal {
            tracing::error!(component = %component, error = %error.source, "internal runtime error");
        }
        error
    }

    /// Wraps a classified component error, carrying its entity id.
    pub fn from_component<E>(component: Component, source: E) -> Self
    where
        E: Classify + std::error::Error + Send + Sync + 'static,
    {
        let class = source.class();
        let entity_id = source.entity_id();
        let mut error = Self::new(class, component, source);
        error.entity_id = entity_id;
        error
    }

    /// Creates an internal error from a message.
    pub fn internal(component: Component, message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::Internal,
            component,
            std::io::Error::other(message.into()),
        )
    }

    /// Attaches the identifier of the entity the error concerns.
    #[must_use]
    pub fn with_entity(mut self, entity_id: impl fmt::Display) -> Self {
        self.entity_id = Some(entity_id.to_string());
        self
    }

    /// Returns the error class.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        self.class
    }

    /// Returns the originating component.
    #[must_use]
    pub const fn component(&self) -> Component {
        self.component
    }

    /// Returns the entity identifier, if known.
    #[must_use]
    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    /// Returns whether retrying the same request later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.class.is_retryable()
    }
}

/// Result type for operations on the runtime's external interface.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Error produced when a lock guarding component state was poisoned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0} state lock poisoned")]
pub struct LockPoisoned(pub &'static str);
