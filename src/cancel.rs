//! Cancellation helpers for suspending operations.
//!
//! Every operation that may suspend takes a [`CancellationToken`]. Timeouts
//! are not a separate mechanism: [`with_deadline`] derives a child token
//! that fires after a duration.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
pub use tokio_util::sync::CancellationToken;

/// Returned when a suspending operation was cancelled.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Derives a token that is cancelled when `parent` is, or after `after`.
///
/// # Panics
///
/// Panics when called outside a tokio runtime, because the deadline timer is
/// spawned onto the current runtime.
#[must_use]
pub fn with_deadline(parent: &CancellationToken, after: Duration) -> CancellationToken {
    let child = parent.child_token();
    let timer = child.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(after) => timer.cancel(),
            () = timer.cancelled() => {}
        }
    });
    child
}

/// Runs `future` unless `token` fires first.
///
/// Cancellation wins ties so a cancelled caller never observes a late
/// result.
///
/// # Errors
///
/// Returns [`Cancelled`] when the token fires before the future completes.
pub async fn guard<F>(token: &CancellationToken, future: F) -> Result<F::Output, Cancelled>
where
    F: Future,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(Cancelled),
        output = future => Ok(output),
    }
}
