//! Inter-agent message bus and control channel.
//!
//! Every live agent owns exactly one mailbox: an ordered queue with a
//! per-recipient sequence number. `send` never suspends; `receive` suspends
//! until a message arrives, the mailbox closes, or the caller's cancellation
//! token fires. The control channel carries sequenced lifecycle, task, and
//! connection events for subscribers that must not poll.

pub mod domain;
pub mod services;

#[cfg(test)]
mod tests;
