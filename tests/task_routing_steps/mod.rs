//! Step definitions for task routing scenarios.

pub mod world;

mod given;
mod then;
mod when;
