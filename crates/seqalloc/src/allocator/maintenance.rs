//! Out-of-band upkeep for an [`Allocator`].
//!
//! Two jobs keep the hot path off the durable store:
//!
//! - Recovery: while the shared tier is marked unavailable, probe it and flip
//!   it back once it answers.
//! - Top-up: when a tier drops below its low-water threshold, reserve a batch
//!   and push all of it into the tier.
//!
//! Both run on a fixed interval in [`Allocator::spawn_maintenance`] and can be
//! triggered directly.

use super::{Allocator, shared_is_ok};
use crate::{
    cache::SequenceCache,
    context::Context,
    error::{Error, Result},
    retry::TokioSleep,
    store::SequenceStore,
};
use core::time::Duration;
use std::sync::Arc;
use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;

const OP_PROBE: &str = "shared probe";
const OP_LEVEL: &str = "shared level";

/// Ids stored by a single [`Allocator::top_up`] pass, per tier.
///
/// Counts are what the tier accepted, which can be less than what was
/// reserved when the tier had no room for the whole batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TopUp {
    pub shared: u64,
    pub local: u64,
}

impl TopUp {
    /// `true` when neither tier was refilled.
    pub const fn is_empty(&self) -> bool {
        self.shared == 0 && self.local == 0
    }
}

impl<D, S, L> Allocator<D, S, L>
where
    D: SequenceStore,
    S: SequenceCache,
    L: SequenceCache,
{
    /// Probes the shared tier, retrying transient failures with the
    /// configured backoff, and records the outcome in the availability flag.
    ///
    /// Returns the new state.
    pub async fn probe_shared(&self, ctx: &Context) -> bool {
        let policy = self.options.retry_policy();
        let healthy = policy
            .run::<TokioSleep, _, _, _>(OP_PROBE, || async {
                if shared_is_ok(&self.shared, ctx).await {
                    Ok(())
                } else {
                    Err(Error::cache(OP_PROBE, "probe failed"))
                }
            })
            .await
            .is_ok();
        self.set_shared_available(healthy);
        healthy
    }

    /// Refills tiers that have fallen below their thresholds.
    ///
    /// The shared tier is only considered while it is available. A failed
    /// level check or fill there marks it unavailable. The local tier is
    /// topped up regardless of shared-tier state, and its failures are only
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns the durable store's error if a reservation fails. Ids already
    /// pushed into a tier earlier in the pass stay there.
    pub async fn top_up(&self, ctx: &Context) -> Result<TopUp> {
        let mut report = TopUp::default();

        if self.is_shared_available() {
            let policy = self.options.retry_policy();
            let below = policy
                .run::<TokioSleep, _, _, _>(OP_LEVEL, || {
                    self.shared
                        .is_less_than_threshold(ctx, self.options.cache_threshold)
                })
                .await;
            match below {
                Ok(true) => {
                    let batch = self.reserve(ctx, self.options.extern_patch).await?;
                    // A timed-out fill may still have landed, so it is never
                    // retried.
                    match self.shared.fill_ids(ctx, &batch.to_vec()).await {
                        Ok(stored) => report.shared = stored as u64,
                        Err(_e) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(
                                tier = "shared",
                                batch = batch.len(),
                                error = %_e,
                                "top-up fill failed"
                            );
                            self.mark_shared_unavailable();
                        }
                    }
                }
                Ok(false) => {}
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(tier = "shared", error = %_e, "level check failed");
                    self.mark_shared_unavailable();
                }
            }
        }

        match self
            .local
            .is_less_than_threshold(ctx, self.options.local_threshold)
            .await
        {
            Ok(true) => {
                let batch = self.reserve(ctx, self.options.local_patch).await?;
                match self.local.fill_ids(ctx, &batch.to_vec()).await {
                    Ok(stored) => {
                        #[cfg(feature = "tracing")]
                        if (stored as u64) < batch.len() {
                            tracing::warn!(
                                tier = "local",
                                batch = batch.len(),
                                stored,
                                "top-up batch larger than free space"
                            );
                        }
                        report.local = stored as u64;
                    }
                    Err(_e) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            tier = "local",
                            batch = batch.len(),
                            error = %_e,
                            "top-up fill failed"
                        );
                    }
                }
            }
            Ok(false) => {}
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(tier = "local", error = %_e, "level check failed");
            }
        }

        #[cfg(feature = "tracing")]
        if !report.is_empty() {
            tracing::debug!(shared = report.shared, local = report.local, "topped up");
        }
        Ok(report)
    }

    /// One maintenance pass: recover the shared tier if needed, then top up.
    pub async fn maintain(&self, ctx: &Context) {
        if !self.is_shared_available() {
            self.probe_shared(ctx).await;
        }
        if let Err(_e) = self.top_up(ctx).await {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %_e, "top-up aborted");
        }
    }
}

impl<D, S, L> Allocator<D, S, L>
where
    D: SequenceStore + 'static,
    S: SequenceCache + 'static,
    L: SequenceCache + 'static,
{
    /// Runs [`maintain`](Allocator::maintain) every `period` until `shutdown`
    /// is cancelled. Each pass is bounded by `period`.
    ///
    /// The first pass runs immediately. A pass in flight when `shutdown` fires
    /// is dropped.
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let ctx = Context::with_timeout(period);
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = this.maintain(&ctx) => {}
                }
            }

            #[cfg(feature = "tracing")]
            tracing::debug!("maintenance stopped");
        })
    }
}
