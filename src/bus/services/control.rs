//! Sequenced event streams for external observers.

use crate::agent::domain::AgentLifecycleEvent;
use crate::bus::domain::BusError;
use crate::task::domain::TaskStatusEvent;
use crate::tool_protocol::domain::ConnectionStateEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::broadcast;

/// An event stamped with its stream position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedEvent<E> {
    /// Position in the stream, starting at 1 with no gaps.
    pub sequence: u64,
    /// Publication timestamp.
    pub emitted_at: DateTime<Utc>,
    /// Event body.
    pub event: E,
}

/// One subscribe-only event stream.
///
/// Sequence numbers are assigned and sent under the same lock, so every
/// subscriber observes them in increasing order. A subscriber that falls
/// behind the buffer sees a jump in `sequence`.
#[derive(Debug)]
pub struct EventStream<E> {
    sender: broadcast::Sender<SequencedEvent<E>>,
    last_sequence: Mutex<u64>,
}

impl<E: Clone> EventStream<E> {
    /// Creates a stream retaining up to `capacity` undelivered events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            last_sequence: Mutex::new(0),
        }
    }

    /// Publishes an event and returns its sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::LockPoisoned`] when the sequence lock is poisoned.
    pub fn publish(&self, event: E, emitted_at: DateTime<Utc>) -> Result<u64, BusError> {
        let mut last = self
            .last_sequence
            .lock()
            .map_err(|_| BusError::LockPoisoned)?;
        *last = last.saturating_add(1);
        let sequence = *last;
        let published = self.sender.send(SequencedEvent {
            sequence,
            emitted_at,
            event,
        });
        if published.is_err() {
            tracing::trace!(sequence, "event published without subscribers");
        }
        Ok(sequence)
    }

    /// Subscribes to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SequencedEvent<E>> {
        self.sender.subscribe()
    }

    /// Returns the sequence number of the most recent event.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::LockPoisoned`] when the sequence lock is poisoned.
    pub fn last_sequence(&self) -> Result<u64, BusError> {
        self.last_sequence
            .lock()
            .map(|last| *last)
            .map_err(|_| BusError::LockPoisoned)
    }
}

/// The three event streams exposed to dashboards and the UI layer.
#[derive(Debug)]
pub struct ControlChannel {
    agents: EventStream<AgentLifecycleEvent>,
    tasks: EventStream<TaskStatusEvent>,
    connections: EventStream<ConnectionStateEvent>,
}

impl ControlChannel {
    /// Creates a control channel whose streams buffer `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            agents: EventStream::new(capacity),
            tasks: EventStream::new(capacity),
            connections: EventStream::new(capacity),
        }
    }

    /// Returns the agent lifecycle stream.
    #[must_use]
    pub const fn agents(&self) -> &EventStream<AgentLifecycleEvent> {
        &self.agents
    }

    /// Returns the task status stream.
    #[must_use]
    pub const fn tasks(&self) -> &EventStream<TaskStatusEvent> {
        &self.tasks
    }

    /// Returns the connection state stream.
    #[must_use]
    pub const fn connections(&self) -> &EventStream<ConnectionStateEvent> {
        &self.connections
    }
}
