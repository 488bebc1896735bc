//! Composition root and the runtime's external surface.
//!
//! [`Orchestrator`] wires the message bus, agent registry, task router, tool
//! client manager and model gateway together, folds their errors into
//! [`crate::error::RuntimeError`], and journals state changes to an optional
//! document store. Build one with [`OrchestratorBuilder`].

mod builder;
mod errors;
mod runtime;
mod snapshots;

pub use builder::OrchestratorBuilder;
pub use runtime::{Orchestrator, RecoveryReport};

#[cfg(test)]
mod tests;
