//! Materialized runtime settings.
//!
//! Loading configuration is the host's concern. The runtime accepts an
//! already-built [`RuntimeSettings`] value, typically deserialized from
//! whichever format the host uses. Every field has a default so partial
//! documents are accepted.

use crate::retry::BackoffPolicy;
use crate::tool_protocol::domain::CallPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Protocol revisions the tool client negotiates, newest first.
pub const DEFAULT_PROTOCOL_VERSIONS: [&str; 3] = ["2025-06-18", "2025-03-26", "2024-11-05"];

/// Top-level runtime settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Agent registry policy.
    pub registry: RegistrySettings,
    /// Message bus limits.
    pub bus: BusSettings,
    /// Tool protocol client behaviour.
    pub tools: ToolSettings,
    /// Model provider retry and fallback behaviour.
    pub providers: ProviderSettings,
}

impl RuntimeSettings {
    /// Requires each capability to be held by at most one live agent.
    #[must_use]
    pub const fn with_unique_capabilities(mut self, unique: bool) -> Self {
        self.registry.unique_capabilities = unique;
        self
    }

    /// Sets the mailbox high-water mark beyond which sends fail.
    #[must_use]
    pub const fn with_mailbox_high_water_mark(mut self, limit: usize) -> Self {
        self.bus.mailbox_high_water_mark = Some(limit);
        self
    }

    /// Sets the reconnection attempt ceiling for tool connections.
    #[must_use]
    pub const fn with_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.tools.reconnect_attempts = attempts;
        self
    }

    /// Sets the default call policy for tool invocations.
    #[must_use]
    pub const fn with_call_policy(mut self, policy: CallPolicy) -> Self {
        self.tools.default_policy = policy;
        self
    }

    /// Sets the provider retry ceiling.
    #[must_use]
    pub const fn with_provider_attempts(mut self, attempts: u32) -> Self {
        self.providers.retry.max_attempts = attempts;
        self
    }

    /// Sets the provider fallback order.
    #[must_use]
    pub fn with_fallback_order(mut self, order: impl IntoIterator<Item = String>) -> Self {
        self.providers.fallback_order = order.into_iter().collect();
        self
    }
}

/// Agent registry policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Rejects registrations whose capabilities overlap a live agent.
    pub unique_capabilities: bool,
}

/// Message bus limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Maximum queued messages per mailbox; `None` means unbounded.
    pub mailbox_high_water_mark: Option<usize>,
    /// Buffer capacity of each control-channel event stream.
    pub event_buffer: usize,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            mailbox_high_water_mark: None,
            event_buffer: 1024,
        }
    }
}

/// Exponential backoff parameters in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    /// Delay ceiling for the first retry.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
}

impl BackoffSettings {
    /// Creates backoff settings.
    #[must_use]
    pub const fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Converts the settings into a backoff policy.
    #[must_use]
    pub const fn policy(self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self::new(100, 10_000)
    }
}

/// Tool protocol client behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    /// Reconnection backoff.
    pub backoff: BackoffSettings,
    /// Reconnection attempts before a connection is abandoned.
    pub reconnect_attempts: u32,
    /// Maximum calls queued on a connection that is not ready.
    pub queue_depth: usize,
    /// Policy applied when a call does not choose one.
    pub default_policy: CallPolicy,
    /// Protocol revisions offered during the handshake, newest first.
    pub supported_protocol_versions: Vec<String>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            backoff: BackoffSettings::default(),
            reconnect_attempts: 3,
            queue_depth: 16,
            default_policy: CallPolicy::FailFast,
            supported_protocol_versions: DEFAULT_PROTOCOL_VERSIONS
                .iter()
                .map(|version| (*version).to_owned())
                .collect(),
        }
    }
}

/// Retry ceiling and backoff for provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts per backend, including the first.
    pub max_attempts: u32,
    /// Backoff between attempts.
    pub backoff: BackoffSettings,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffSettings::new(200, 5_000),
        }
    }
}

/// Model provider retry and fallback behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Retry policy applied per backend.
    pub retry: RetrySettings,
    /// Backend identifiers tried in order by fallback generation.
    pub fallback_order: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_document_yields_defaults() {
        let settings: RuntimeSettings =
            serde_json::from_value(json!({})).expect("empty settings should deserialize");

        assert_eq!(settings, RuntimeSettings::default());
        assert!(!settings.registry.unique_capabilities);
        assert_eq!(settings.bus.mailbox_high_water_mark, None);
        assert_eq!(settings.tools.reconnect_attempts, 3);
        assert_eq!(settings.tools.default_policy, CallPolicy::FailFast);
        assert_eq!(settings.providers.retry.max_attempts, 3);
    }

    #[test]
    fn partial_document_overrides_selected_fields() {
        let settings: RuntimeSettings = serde_json::from_value(json!({
            "bus": { "mailbox_high_water_mark": 8 },
            "tools": { "default_policy": "queue", "backoff": { "base_delay_ms": 5 } },
            "providers": { "fallback_order": ["local", "remote"] }
        }))
        .expect("partial settings should deserialize");

        assert_eq!(settings.bus.mailbox_high_water_mark, Some(8));
        assert_eq!(settings.bus.event_buffer, 1024);
        assert_eq!(settings.tools.default_policy, CallPolicy::Queue);
        assert_eq!(settings.tools.backoff.base_delay_ms, 5);
        assert_eq!(settings.tools.backoff.max_delay_ms, 10_000);
        assert_eq!(
            settings.providers.fallback_order,
            vec!["local".to_owned(), "remote".to_owned()]
        );
    }

    #[test]
    fn builders_update_nested_settings() {
        let settings = RuntimeSettings::default()
            .with_unique_capabilities(true)
            .with_mailbox_high_water_mark(2)
            .with_reconnect_attempts(5)
            .with_provider_attempts(1);

        assert!(settings.registry.unique_capabilities);
        assert_eq!(settings.bus.mailbox_high_water_mark, Some(2));
        assert_eq!(settings.tools.reconnect_attempts, 5);
        assert_eq!(settings.providers.retry.max_attempts, 1);
    }
}
