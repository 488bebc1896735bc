//! Unit tests for the persistence module.

mod journal_tests;
