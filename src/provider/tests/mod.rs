//! Unit tests for the provider module.

mod gateway_tests;
