//! Conversions from component errors into [`RuntimeError`].

use crate::agent::services::AgentRegistryError;
use crate::bus::domain::BusError;
use crate::error::{Component, RuntimeError};
use crate::persistence::ports::DocumentStoreError;
use crate::persistence::services::JournalError;
use crate::provider::services::ProviderError;
use crate::task::services::TaskRouterError;
use crate::tool_protocol::services::ToolClientError;

macro_rules! from_component {
    ($($error:ty => $component:expr),+ $(,)?) => {
        $(
            impl From<$error> for RuntimeError {
                fn from(source: $error) -> Self {
                    Self::from_component($component, source)
                }
            }
        )+
    };
}

from_component! {
    AgentRegistryError => Component::Registry,
    TaskRouterError => Component::Router,
    BusError => Component::Bus,
    ToolClientError => Component::ToolClient,
    ProviderError => Component::Provider,
    DocumentStoreError => Component::Persistence,
    JournalError => Component::Persistence,
}
