//! Collections and document keys.

use super::{ParseCollectionError, PersistenceDomainError};
use crate::agent::domain::AgentId;
use crate::task::domain::TaskId;
use crate::tool_protocol::domain::ConnectionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Group of documents sharing one shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Agent registry snapshot.
    Agents,
    /// Task table.
    Tasks,
    /// Tool connection configuration.
    Connections,
}

impl Collection {
    /// Every collection, in recovery order.
    pub const ALL: [Self; 3] = [Self::Agents, Self::Tasks, Self::Connections];

    /// Returns the canonical storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Agents => "agents",
            Self::Tasks => "tasks",
            Self::Connections => "connections",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = ParseCollectionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|collection| collection.as_str() == value)
            .ok_or_else(|| ParseCollectionError(value.to_owned()))
    }
}

impl TryFrom<&str> for Collection {
    type Error = ParseCollectionError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Address of one stored document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    collection: Collection,
    entity_id: String,
}

impl DocumentKey {
    /// Creates a key, trimming the entity id.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceDomainError::EmptyEntityId`] when the id is
    /// blank.
    pub fn new(
        collection: Collection,
        entity_id: impl AsRef<str>,
    ) -> Result<Self, PersistenceDomainError> {
        let trimmed = entity_id.as_ref().trim();
        if trimmed.is_empty() {
            return Err(PersistenceDomainError::EmptyEntityId);
        }
        Ok(Self {
            collection,
            entity_id: trimmed.to_owned(),
        })
    }

    /// Returns the collection.
    #[must_use]
    pub const fn collection(&self) -> Collection {
        self.collection
    }

    /// Returns the entity id.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.entity_id)
    }
}

/// Typed reference to a runtime entity that owns a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    /// A registered agent.
    Agent(AgentId),
    /// A submitted task.
    Task(TaskId),
    /// A tool server connection.
    Connection(ConnectionId),
}

impl EntityRef {
    /// Returns the collection the entity is stored in.
    #[must_use]
    pub const fn collection(self) -> Collection {
        match self {
            Self::Agent(_) => Collection::Agents,
            Self::Task(_) => Collection::Tasks,
            Self::Connection(_) => Collection::Connections,
        }
    }

    /// Returns the document key for the entity.
    #[must_use]
    pub fn key(self) -> DocumentKey {
        let entity_id = match self {
            Self::Agent(id) => id.to_string(),
            Self::Task(id) => id.to_string(),
            Self::Connection(id) => id.to_string(),
        };
        DocumentKey {
            collection: self.collection(),
            entity_id,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.key().fmt(f)
    }
}
