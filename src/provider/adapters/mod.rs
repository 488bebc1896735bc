//! Backend adapters.

pub mod scripted;
