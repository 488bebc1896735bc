//! Crash-consistency boundary for runtime state.
//!
//! Agents, tasks and tool connection configurations are stored as JSON
//! documents keyed by collection and entity id through the
//! [`ports::DocumentStore`] contract. The runtime never awaits storage on
//! its control path: mutations only mark entities dirty on a
//! [`services::Journal`], whose background worker snapshots and writes
//! them in order.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
