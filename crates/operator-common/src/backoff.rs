//! # Exponential Backoff
//!
//! Retry delays that start at an initial value and grow by a constant factor,
//! optionally capped. Used for cordon/drain retries, optimistic-concurrency
//! retries and for spacing out failed reconcile passes.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    current: Duration,
    factor: u32,
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a backoff starting at `initial`, multiplied by `factor` per step, capped at `max`
    #[must_use]
    pub fn new(initial: Duration, factor: u32, max: Duration) -> Self {
        Self {
            initial,
            current: initial,
            factor,
            max,
        }
    }

    /// Get the next delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = self
            .current
            .checked_mul(self.factor)
            .map_or(self.max, |next| next.min(self.max));
        result
    }

    /// Convenience wrapper returning whole seconds
    pub fn next_backoff_seconds(&mut self) -> u64 {
        self.next_backoff().as_secs()
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Bounded retry schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub attempts: u32,
    pub initial: Duration,
    pub factor: u32,
}

impl RetryPolicy {
    /// Cordon, drain and uncordon: 5 attempts, 15s doubling
    pub const DRAIN: RetryPolicy = RetryPolicy {
        attempts: 5,
        initial: Duration::from_secs(15),
        factor: 2,
    };

    /// Optimistic-concurrency conflicts: 5 attempts, 10ms doubling
    pub const CONFLICT: RetryPolicy = RetryPolicy {
        attempts: 5,
        initial: Duration::from_millis(10),
        factor: 2,
    };

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.initial, self.factor, Duration::MAX)
    }
}

/// Run `op` until it succeeds, `retryable` rejects the error, or attempts run out
///
/// Returns the last error on failure.
pub async fn retry<T, E, F, Fut, R>(policy: RetryPolicy, what: &str, retryable: R, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut backoff = policy.backoff();
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.attempts && retryable(&e) => {
                let delay = backoff.next_backoff();
                warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}",
                    what, attempt, policy.attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_backoff_sequence() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(15), 2, Duration::from_secs(600));

        // Drain retry sequence: 15s, 30s, 1m, 2m, 4m, 8m, 10m (max)
        assert_eq!(backoff.next_backoff_seconds(), 15); // 15s
        assert_eq!(backoff.next_backoff_seconds(), 30); // 30s
        assert_eq!(backoff.next_backoff_seconds(), 60); // 1m
        assert_eq!(backoff.next_backoff_seconds(), 120); // 2m
        assert_eq!(backoff.next_backoff_seconds(), 240); // 4m
        assert_eq!(backoff.next_backoff_seconds(), 480); // 8m
        assert_eq!(backoff.next_backoff_seconds(), 600); // 10m (max)
        assert_eq!(backoff.next_backoff_seconds(), 600);
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(5), 2, Duration::from_secs(300));

        assert_eq!(backoff.next_backoff_seconds(), 5);
        assert_eq!(backoff.next_backoff_seconds(), 10);
        assert_eq!(backoff.next_backoff_seconds(), 20);

        backoff.reset();

        // Should restart from beginning after success
        assert_eq!(backoff.next_backoff_seconds(), 5);
        assert_eq!(backoff.next_backoff_seconds(), 10);
    }

    #[test]
    fn test_exponential_backoff_does_not_overflow() {
        let mut backoff = RetryPolicy::DRAIN.backoff();
        for _ in 0..200 {
            backoff.next_backoff();
        }
        assert_eq!(backoff.next_backoff(), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_after_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry(RetryPolicy::DRAIN, "cordon", |_| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("api unavailable".to_string()) }
        })
        .await;

        assert_eq!(result, Err("api unavailable".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_returns_first_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry(RetryPolicy::CONFLICT, "update", |_| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err("conflict".to_string()) } else { Ok(n) } }
        })
        .await;

        assert_eq!(result, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_on_non_retryable_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry(RetryPolicy::CONFLICT, "update", |e: &String| e == "conflict", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("forbidden".to_string()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
