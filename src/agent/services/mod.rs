//! Registry service owning the agent table.

mod registry;

pub use registry::{
    AgentRegistry, AgentRegistryError, AgentRegistryResult, IdleCandidate, RegisterAgentRequest,
};
