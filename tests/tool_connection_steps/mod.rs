//! Step definitions for tool connection scenarios.

pub mod world;

mod given;
mod then;
mod when;
