//! Exponential backoff with an injectable jitter source and sleeper.
//!
//! Delays follow the "full jitter" strategy: the delay before retry `n`
//! (0-indexed) is drawn from `0..=min(max, base * 2^n)`. Randomness and
//! waiting are both behind traits so reconnection and retry loops can be
//! driven deterministically in tests.

use async_trait::async_trait;
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
}

impl BackoffPolicy {
    /// Creates a policy with a base delay and a cap.
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Returns the base delay.
    #[must_use]
    pub const fn base(&self) -> Duration {
        self.base
    }

    /// Returns the delay cap.
    #[must_use]
    pub const fn max(&self) -> Duration {
        self.max
    }

    /// Returns the un-jittered delay ceiling for a 0-indexed attempt.
    #[must_use]
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let base_ms = duration_millis(self.base);
        let max_ms = duration_millis(self.max);
        let factor = 1_u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }

    /// Returns the jittered delay for a 0-indexed attempt.
    #[must_use]
    pub fn delay(&self, attempt: u32, jitter: &dyn JitterSource) -> Duration {
        jitter.pick(self.ceiling(attempt))
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Source of randomness for backoff delays.
pub trait JitterSource: Send + Sync {
    /// Picks a delay in `0..=ceiling`.
    fn pick(&self, ceiling: Duration) -> Duration;
}

/// Uniformly random delay between zero and the ceiling.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullJitter;

impl JitterSource for FullJitter {
    fn pick(&self, ceiling: Duration) -> Duration {
        let ceiling_ms = duration_millis(ceiling);
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=ceiling_ms))
    }
}

/// Always waits the full ceiling.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn pick(&self, ceiling: Duration) -> Duration {
        ceiling
    }
}

/// Waits for a duration.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspends the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Sleeper that returns immediately and records every requested delay.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    /// Creates an empty recording sleeper.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the delays requested so far, in order.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|delays| delays.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(100), Duration::from_millis(1_000))
    }

    #[rstest]
    #[case(0, 100)]
    #[case(1, 200)]
    #[case(2, 400)]
    #[case(3, 800)]
    #[case(4, 1_000)]
    #[case(63, 1_000)]
    #[case(64, 1_000)]
    #[case(u32::MAX, 1_000)]
    fn ceiling_doubles_until_capped(#[case] attempt: u32, #[case] expected_ms: u64) {
        assert_eq!(policy().ceiling(attempt), Duration::from_millis(expected_ms));
    }

    #[test]
    fn full_jitter_stays_within_ceiling() {
        let policy = policy();
        for attempt in 0..8 {
            let delay = policy.delay(attempt, &FullJitter);
            assert!(delay <= policy.ceiling(attempt));
        }
    }

    #[test]
    fn zero_ceiling_yields_zero_delay() {
        assert_eq!(FullJitter.pick(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn no_jitter_returns_ceiling() {
        assert_eq!(policy().delay(2, &NoJitter), Duration::from_millis(400));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn recording_sleeper_keeps_order() {
        let sleeper = RecordingSleeper::new();
        sleeper.sleep(Duration::from_millis(3)).await;
        sleeper.sleep(Duration::from_millis(1)).await;

        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_millis(3), Duration::from_millis(1)]
        );
    }
}
