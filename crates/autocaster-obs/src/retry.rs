//! Bounded retry for requests that hit the post-switch rebuild window.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ObsResult;

/// Fixed-backoff retry for transient OBS failures.
///
/// Only [`crate::ObsError::is_transient`] errors are retried; everything
/// else is returned on the first attempt. The policy adds no idempotence of
/// its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    tries: u32,
    delay: Duration,
}

impl RetryPolicy {
    pub const MIN_TRIES: u32 = 3;
    pub const MAX_TRIES: u32 = 6;
    pub const MIN_DELAY: Duration = Duration::from_millis(140);
    pub const MAX_DELAY: Duration = Duration::from_millis(160);

    /// Create a policy, clamping both values into their supported ranges.
    #[must_use]
    pub fn new(tries: u32, delay: Duration) -> Self {
        let clamped = Self {
            tries: tries.clamp(Self::MIN_TRIES, Self::MAX_TRIES),
            delay: delay.clamp(Self::MIN_DELAY, Self::MAX_DELAY),
        };
        if clamped.tries != tries || clamped.delay != delay {
            warn!(
                tries,
                ?delay,
                used_tries = clamped.tries,
                used_delay = ?clamped.delay,
                "Retry policy out of range, clamped"
            );
        }
        clamped
    }

    #[must_use]
    pub fn tries(&self) -> u32 {
        self.tries
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `op`, retrying transient failures.
    ///
    /// # Errors
    /// Returns the first non-transient error, or the last transient error
    /// once every attempt is spent.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> ObsResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ObsResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < self.tries => {
                    debug!(label, attempt, error = %e, "Transient OBS failure, retrying");
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { tries: 4, delay: Duration::from_millis(150) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ObsError;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn not_ready() -> ObsError {
        ObsError::from_status(207, Some("OBS is not ready to perform the request".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_exactly_tries_on_transient() {
        let policy = RetryPolicy::new(3, Duration::from_millis(150));
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result: ObsResult<()> = policy
            .run("GetSceneList", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(not_ready())
            })
            .await;

        assert_matches!(result, Err(ObsError::Transient { code: 207, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two sleeps between three attempts
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300) && elapsed < Duration::from_millis(310));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_returns_immediately() {
        let policy = RetryPolicy::new(3, Duration::from_millis(150));
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result: ObsResult<()> = policy
            .run("CreateScene", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ObsError::from_status(601, None))
            })
            .await;

        assert_matches!(result, Err(ObsError::Conflict { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);

        let result = policy
            .run("GetSceneList", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 { Err(not_ready()) } else { Ok(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_policy_is_clamped() {
        let policy = RetryPolicy::new(10, Duration::from_millis(5));
        assert_eq!(policy.tries(), RetryPolicy::MAX_TRIES);
        assert_eq!(policy.delay(), RetryPolicy::MIN_DELAY);

        let policy = RetryPolicy::new(1, Duration::from_secs(1));
        assert_eq!(policy.tries(), RetryPolicy::MIN_TRIES);
        assert_eq!(policy.delay(), RetryPolicy::MAX_DELAY);

        assert_eq!(RetryPolicy::default().tries(), 4);
    }
}
