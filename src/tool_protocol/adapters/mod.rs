//! Tool connector implementations.

pub mod memory;
pub mod stdio;
