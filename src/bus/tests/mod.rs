//! Unit tests for the bus module.

mod mailbox_tests;
