//! Plexus: agent orchestration and protocol runtime.
//!
//! This crate keeps many agents, tool server connections and in-flight model
//! calls consistent under partial failure. It owns agent lifecycles, routes
//! tasks to capable agents, delivers messages between them, manages
//! MCP-style tool connections with reconnection, and fronts model backends
//! with retry, streaming and fallback.
//!
//! # Architecture
//!
//! Plexus follows hexagonal architecture principles:
//!
//! - **Domain**: Pure types and state machines with no infrastructure
//!   dependencies
//! - **Ports**: Abstract trait interfaces for tool servers, model backends
//!   and document storage
//! - **Adapters**: Concrete implementations of ports (stdio processes and
//!   in-memory stores and backends)
//! - **Services**: Components that own state and enforce invariants
//!
//! # Modules
//!
//! - [`agent`]: Agent registry and lifecycle state machine
//! - [`task`]: Task routing and delegation
//! - [`bus`]: Per-agent mailboxes and the control-channel event streams
//! - [`tool_protocol`]: Tool server connections, discovery and calls
//! - [`provider`]: Model backends with retry, streaming and fallback
//! - [`persistence`]: Document storage and the write-behind journal
//! - [`orchestrator`]: Composition root and external surface
//! - [`retry`], [`cancel`], [`error`], [`config`]: Shared plumbing

pub mod agent;
pub mod bus;
pub mod cancel;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod persistence;
pub mod provider;
pub mod retry;
pub mod task;
pub mod tool_protocol;
