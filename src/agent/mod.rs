//! Agent registry and lifecycle state machine.
//!
//! The registry owns the canonical state of every agent instance. Agents
//! declare an immutable capability set on registration and move through
//! `created -> initializing -> idle <-> running -> paused -> idle`, with
//! `stopping -> terminated` reachable from every live state. Each accepted
//! transition is published on the message bus control channel.
//!
//! - Domain types in [`domain`]
//! - The registry service in [`services`]

pub mod domain;
pub mod services;

#[cfg(test)]
mod tests;
