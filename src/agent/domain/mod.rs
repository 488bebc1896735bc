//! Domain model for agent registration and lifecycle.

mod agent;
mod capability;
mod error;
mod event;
mod ids;
mod state;

pub use agent::{Agent, PersistedAgentData};
pub use capability::{Capability, CapabilitySet};
pub use error::{AgentDomainError, ParseAgentStateError};
pub use event::{AgentLifecycleEvent, AgentTransition};
pub use ids::AgentId;
pub use state::{AgentState, LifecycleEvent};
