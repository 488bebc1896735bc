//! Model provider abstraction.
//!
//! A uniform interface over inference backends. A generation returns either
//! a complete response or a finite, non-restartable stream of chunks whose
//! last element is marked final. Transient backend failures are retried with
//! backoff; non-transient ones fail at once and are classified separately so
//! callers can fall back to another backend.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
