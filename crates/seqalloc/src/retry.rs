use crate::error::Result;
use core::{future::Future, pin::Pin, time::Duration};
use rand::Rng;

/// A trait that abstracts over how to sleep for a given [`Duration`] in async
/// contexts.
///
/// This keeps [`RetryPolicy`] independent of the runtime driving it.
pub trait SleepProvider {
    /// We require `Send` so that the future can be safely moved across threads
    type Sleep: Future<Output = ()> + Send;

    fn sleep_for(dur: Duration) -> Self::Sleep;
}

/// An implementation of [`SleepProvider`] using Tokio's timer.
pub struct TokioSleep;
impl SleepProvider for TokioSleep {
    type Sleep = tokio::time::Sleep;

    fn sleep_for(dur: Duration) -> Self::Sleep {
        tokio::time::sleep(dur)
    }
}

/// An implementation of [`SleepProvider`] that only yields to the scheduler.
///
/// Useful in tests and benches where the backoff itself is irrelevant.
pub struct TokioYield;
impl SleepProvider for TokioYield {
    /// Tokio's `yield_now()` returns a private future type, so we must use a
    /// boxed `dyn Future` to abstract over it.
    type Sleep = Pin<Box<dyn Future<Output = ()> + Send>>;

    fn sleep_for(_dur: Duration) -> Self::Sleep {
        Box::pin(tokio::task::yield_now())
    }
}

/// Exponential backoff with jitter for transient tier failures.
///
/// The delay before retry `n` (zero based) is `base * multiplier^n` plus a
/// random jitter in `[0, max_jitter]`. Only errors reporting
/// [`Error::is_retryable`](crate::Error::is_retryable) are retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    multiplier: u32,
    max_jitter: Duration,
}

impl RetryPolicy {
    /// Creates a policy doubling `base_delay` on each attempt, with jitter of
    /// up to half the base delay.
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            multiplier: 2,
            max_jitter: Duration::from_nanos((base_delay.as_nanos() / 2) as u64),
        }
    }

    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier;
        self
    }

    #[must_use]
    pub const fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Total attempts, never less than one.
    pub const fn max_attempts(&self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }

    /// Deterministic part of the delay before retry `attempt`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(self.multiplier.saturating_pow(attempt))
    }

    /// Delay before retry `attempt`, jitter included.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff_for(attempt);
        let jitter_nanos = u64::try_from(self.max_jitter.as_nanos()).unwrap_or(u64::MAX);
        if jitter_nanos == 0 {
            return backoff;
        }
        let jitter = Duration::from_nanos(rand::rng().random_range(0..=jitter_nanos));
        backoff.saturating_add(jitter)
    }

    /// Runs `f` until it succeeds, fails with a non-retryable error, or the
    /// attempts are exhausted.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, or the last error once every
    /// attempt has failed.
    pub async fn run<S, T, F, Fut>(&self, _op: &'static str, mut f: F) -> Result<T>
    where
        S: SleepProvider,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts();
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.delay_for(attempt);
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        op = _op,
                        attempt = attempt + 1,
                        ?delay,
                        error = %e,
                        "retrying after transient failure"
                    );
                    S::sleep_for(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, ErrorKind};
    use core::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy::new(5, Duration::from_millis(50));
        assert_eq!(policy.backoff_for(0), Duration::from_millis(50));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));

        let tripled = policy.with_multiplier(3);
        assert_eq!(tripled.backoff_for(2), Duration::from_millis(450));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_millis(40));
        for attempt in 0..3 {
            let delay = policy.delay_for(attempt);
            let floor = policy.backoff_for(attempt);
            assert!(delay >= floor);
            assert!(delay <= floor + Duration::from_millis(20));
        }

        let exact = policy.with_max_jitter(Duration::ZERO);
        assert_eq!(exact.delay_for(1), Duration::from_millis(80));
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10));

        let v = policy
            .run::<TokioSleep, _, _, _>("flaky", || async {
                if calls.fetch_add(1, Ordering::Relaxed) < 2 {
                    Err(Error::cache("flaky", "connection reset"))
                } else {
                    Ok(42_u64)
                }
            })
            .await
            .unwrap();

        assert_eq!(v, 42);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10));

        let err = policy
            .run::<TokioYield, (), _, _>("down", || async {
                calls.fetch_add(1, Ordering::Relaxed);
                Err(Error::timeout("down"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(10));

        let err = policy
            .run::<TokioYield, (), _, _>("store", || async {
                calls.fetch_add(1, Ordering::Relaxed);
                Err(Error::database("store", "constraint violation"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Database);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
