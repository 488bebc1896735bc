//! Unit tests for the tool protocol module.
