//! Task router and delegation engine.
//!
//! Tasks enter as `pending`, are handed to the least-loaded idle agent that
//! declares the required capability, and finish as `completed`, `failed`, or
//! `cancelled`. Terminal states are final. Assignment is a single
//! check-and-set under the router lock, so at most one agent ever holds a
//! task. Tasks nobody can take wait in a priority queue until an agent
//! becomes idle.
//!
//! - Domain types in [`domain`]
//! - The router service in [`services`]

pub mod domain;
pub mod services;

#[cfg(test)]
mod tests;
