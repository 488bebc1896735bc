//! Mailbox service and control channel.

mod control;
mod mailbox;

pub use control::{ControlChannel, EventStream, SequencedEvent};
pub use mailbox::MessageBus;
