use crate::error::{Error, Result};
use core::{future::Future, time::Duration};
use tokio::time::Instant;

/// Deadline carried through every tier operation.
///
/// A [`Context`] either has no deadline ([`Context::background`]) or expires
/// at a fixed instant. Operations run through [`Context::run`] race against
/// that instant; when the deadline wins, the operation's future is dropped
/// (cancelling it) and [`Error::Timeout`] is returned. This keeps "the tier
/// is slow" distinguishable from "the tier is empty" and "the tier failed".
///
/// `Context` is `Copy`, so a single request can hand the same deadline to
/// every tier it visits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Context {
    deadline: Option<Instant>,
}

impl Context {
    /// A context that never expires.
    pub const fn background() -> Self {
        Self { deadline: None }
    }

    /// A context expiring `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context expiring at `deadline`.
    pub const fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|at| at <= Instant::now())
    }

    /// Returns a context bounded by both this deadline and `bound` from now,
    /// whichever comes first.
    pub fn tightened(&self, bound: Duration) -> Self {
        let local = Instant::now() + bound;
        match self.deadline {
            Some(at) if at <= local => *self,
            _ => Self::with_deadline(local),
        }
    }

    /// Runs `fut` to completion unless the deadline passes first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] tagged with `op` when the deadline expires,
    /// otherwise whatever `fut` resolves to.
    pub async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.deadline {
            None => fut.await,
            Some(at) => match tokio::time::timeout_at(at, fut).await {
                Ok(res) => res,
                Err(_elapsed) => Err(Error::timeout(op)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[tokio::test]
    async fn background_never_times_out() {
        let ctx = Context::background();
        assert_eq!(ctx.remaining(), None);
        assert!(!ctx.is_expired());

        let v = ctx.run("noop", async { Ok(7_u64) }).await.unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_yields_timeout() {
        let ctx = Context::with_timeout(Duration::from_millis(10));
        let err = ctx
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.op(), "slow");
        assert!(ctx.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn inner_errors_pass_through() {
        let ctx = Context::with_timeout(Duration::from_secs(1));
        let err = ctx
            .run::<(), _>("empty", async { Err(Error::not_found("empty")) })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn tightened_keeps_the_earlier_deadline() {
        let near = Context::with_timeout(Duration::from_millis(5));
        assert_eq!(near.tightened(Duration::from_secs(1)), near);

        let far = Context::with_timeout(Duration::from_secs(60));
        let bounded = far.tightened(Duration::from_millis(100));
        assert!(bounded.deadline() < far.deadline());

        let unbounded = Context::background().tightened(Duration::from_millis(100));
        assert_eq!(unbounded.remaining(), Some(Duration::from_millis(100)));
    }
}
