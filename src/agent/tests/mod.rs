//! Unit tests for the agent module.

mod registry_tests;
