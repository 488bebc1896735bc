//! Tool protocol client manager.
//!
//! Owns connections to external tool servers speaking an MCP-style
//! protocol: handshake and version negotiation, tool discovery, call
//! dispatch, and automatic reconnection. Each connection follows
//! `disconnected -> connecting -> ready`, drops to `degraded` when a call
//! hits a transport fault, and is retried with full-jitter backoff until an
//! attempt ceiling leaves it `disconnected` for good.
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - The client manager in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
