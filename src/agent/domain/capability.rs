//! Capability tags declared by agents and required by tasks.

use super::AgentDomainError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Maximum length of a capability tag.
const MAX_CAPABILITY_LENGTH: usize = 100;

/// Validated capability tag.
///
/// Tags are trimmed and lowercased. Only `[a-z0-9_.:-]` is accepted so a tag
/// can be matched by plain string equality (e.g. `search`, `web.fetch`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Capability(String);

impl Capability {
    /// Creates a validated capability tag.
    ///
    /// # Errors
    ///
    /// Returns [`AgentDomainError::EmptyCapability`] when the value is blank,
    /// [`AgentDomainError::CapabilityTooLong`] when it exceeds 100 characters,
    /// or [`AgentDomainError::InvalidCapability`] when it contains characters
    /// outside `[a-z0-9_.:-]`.
    pub fn new(value: impl Into<String>) -> Result<Self, AgentDomainError> {
        let raw = value.into();
        let normalized = raw.trim().to_ascii_lowercase();

        if normalized.is_empty() {
            return Err(AgentDomainError::EmptyCapability);
        }

        if normalized.len() > MAX_CAPABILITY_LENGTH {
            return Err(AgentDomainError::CapabilityTooLong(raw));
        }

        let is_valid = normalized.chars().all(|character| {
            character.is_ascii_lowercase()
                || character.is_ascii_digit()
                || matches!(character, '_' | '.' | ':' | '-')
        });
        if !is_valid {
            return Err(AgentDomainError::InvalidCapability(raw));
        }

        Ok(Self(normalized))
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Capability {
    type Error = AgentDomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Capability> for String {
    fn from(value: Capability) -> Self {
        value.0
    }
}

impl AsRef<str> for Capability {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Finite, ordered set of capability tags.
///
/// Membership is the only matching rule used by the task router.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// Parses and validates a collection of capability names.
    ///
    /// Duplicates collapse into one entry.
    ///
    /// # Errors
    ///
    /// Returns the first validation error from [`Capability::new`].
    pub fn parse<I, S>(names: I) -> Result<Self, AgentDomainError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names
            .into_iter()
            .map(Capability::new)
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }

    /// Returns whether the set contains `capability`.
    #[must_use]
    pub fn contains(&self, capability: &Capability) -> bool {
        self.0.contains(capability)
    }

    /// Returns the first capability shared with `other`, if any.
    #[must_use]
    pub fn first_shared<'a>(&'a self, other: &'a Self) -> Option<&'a Capability> {
        self.0.intersection(&other.0).next()
    }

    /// Returns the number of capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates capabilities in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
