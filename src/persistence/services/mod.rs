//! Snapshot encoding, recovery loading, and the write-behind journal.

mod journal;
mod snapshot;

pub use journal::{Journal, JournalError, JournalReport};
pub use snapshot::{RecoveredState, encode, load_state};
