//! The three-tier orchestrator.
//!
//! An [`Allocator`] serves ids from a shared cache while that tier is
//! believed healthy, from a process-local cache otherwise, and from the
//! durable store when both caches are empty or broken:
//!
//! ```text
//!   shared (available) --empty--> reserve extern_patch, fill rest into shared
//!        |  error: mark unavailable (unless the caller's deadline expired)
//!        v
//!   local ------------empty--> reserve local_patch, fill rest into local
//!        |  error
//!        v
//!   durable store (count = 1)
//! ```
//!
//! Only a durable store failure fails a call. Recovery of the shared tier and
//! proactive refills happen out of band, see [`Allocator::probe_shared`],
//! [`Allocator::top_up`] and [`Allocator::spawn_maintenance`].

mod maintenance;

pub use maintenance::*;

use crate::{
    cache::SequenceCache,
    context::Context,
    error::{Error, Result},
    options::AllocatorOptions,
    store::{Batch, SequenceStore},
};
use core::time::Duration;
use portable_atomic::{AtomicBool, Ordering};

const OP_NEXT: &str = "next id";
const OP_HEALTH: &str = "shared health";

/// Bound on the shared-tier health check run by [`Allocator::new`].
pub const DEFAULT_STARTUP_CHECK_TIMEOUT: Duration = Duration::from_secs(1);

/// Asks the shared tier whether it is healthy, giving up when `ctx` expires
/// even if the tier itself ignores the deadline.
async fn shared_is_ok<S: SequenceCache>(shared: &S, ctx: &Context) -> bool {
    ctx.run(OP_HEALTH, async { Ok(shared.is_ok(ctx).await) })
        .await
        .unwrap_or(false)
}

/// Hands out unique 64-bit ids from a durable store through two cache tiers.
///
/// The allocator is a passive, thread-safe service object: share one
/// instance (usually behind an [`Arc`](std::sync::Arc)) between every task
/// that needs ids. The only mutable state is the shared-tier availability
/// flag, read without locking on every call.
///
/// Concurrent callers that miss the same tier at the same time each reserve
/// their own batch. Uniqueness still holds because the store's batches are
/// disjoint, but some ids may never be issued under heavy contention.
///
/// A shared-tier error seen after the caller's own deadline has passed does
/// not mark the tier unavailable. The call still falls through to the local
/// tier.
#[derive(Debug)]
pub struct Allocator<D, S, L> {
    store: D,
    shared: S,
    local: L,
    options: AllocatorOptions,
    shared_available: AtomicBool,
}

impl<D, S, L> Allocator<D, S, L>
where
    D: SequenceStore,
    S: SequenceCache,
    L: SequenceCache,
{
    /// Creates an allocator, checking the shared tier once to decide whether
    /// it starts out available. The check is bounded by
    /// [`DEFAULT_STARTUP_CHECK_TIMEOUT`]; a tier that does not answer in time
    /// starts out unavailable.
    ///
    /// Zero-valued options are replaced by their defaults.
    pub async fn new(store: D, shared: S, local: L, options: AllocatorOptions) -> Self {
        let ctx = Context::with_timeout(DEFAULT_STARTUP_CHECK_TIMEOUT);
        Self::new_within(store, shared, local, options, &ctx).await
    }

    /// Like [`new`](Self::new), with the startup check bounded by `ctx`
    /// instead of the default timeout.
    pub async fn new_within(
        store: D,
        shared: S,
        local: L,
        options: AllocatorOptions,
        ctx: &Context,
    ) -> Self {
        let available = shared_is_ok(&shared, ctx).await;
        #[cfg(feature = "tracing")]
        if !available {
            tracing::warn!("shared cache unreachable at startup, serving from local tier");
        }
        Self::with_shared_available(store, shared, local, options, available)
    }

    /// Creates an allocator with an explicit initial shared-tier state and no
    /// health check.
    pub fn with_shared_available(
        store: D,
        shared: S,
        local: L,
        options: AllocatorOptions,
        available: bool,
    ) -> Self {
        Self {
            store,
            shared,
            local,
            options: options.with_defaults(),
            shared_available: AtomicBool::new(available),
        }
    }

    pub fn options(&self) -> &AllocatorOptions {
        &self.options
    }

    pub fn store(&self) -> &D {
        &self.store
    }

    pub fn shared(&self) -> &S {
        &self.shared
    }

    pub fn local(&self) -> &L {
        &self.local
    }

    /// Whether requests currently try the shared tier first.
    pub fn is_shared_available(&self) -> bool {
        self.shared_available.load(Ordering::Acquire)
    }

    /// Stops routing requests to the shared tier until a successful
    /// [`probe_shared`](Self::probe_shared).
    pub fn mark_shared_unavailable(&self) {
        self.set_shared_available(false);
    }

    /// Flips the flag and returns the previous state.
    fn set_shared_available(&self, available: bool) -> bool {
        let was = self.shared_available.swap(available, Ordering::AcqRel);
        #[cfg(feature = "tracing")]
        if was != available {
            if available {
                tracing::info!("shared cache recovered");
            } else {
                tracing::warn!("shared cache marked unavailable");
            }
        }
        was
    }

    /// Returns the next unique id.
    ///
    /// # Errors
    ///
    /// - Any error from the durable store, unchanged.
    /// - [`Error::NotFound`] if the durable store handed back an empty batch.
    pub async fn next_id(&self, ctx: &Context) -> Result<u64> {
        if self.is_shared_available() {
            match self.shared.get_single_id(ctx).await {
                Ok(id) => return Ok(id),
                Err(e) if e.is_not_found() => return self.refill_shared(ctx).await,
                Err(_e) if ctx.is_expired() => {
                    // Out of time on the caller's side; the tier keeps its state.
                    #[cfg(feature = "tracing")]
                    tracing::debug!(tier = "shared", error = %_e, "get failed after caller deadline");
                }
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(tier = "shared", error = %_e, "get failed, degrading to local tier");
                    self.mark_shared_unavailable();
                }
            }
        }

        match self.local.get_single_id(ctx).await {
            Ok(id) => Ok(id),
            Err(e) if e.is_not_found() => self.refill_local(ctx).await,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(tier = "local", error = %_e, "get failed, reserving a single id");
                self.reserve(ctx, 1).await?.first().ok_or(Error::not_found(OP_NEXT))
            }
        }
    }

    /// Shared tier is empty: take a full batch, keep the head, queue the rest.
    async fn refill_shared(&self, ctx: &Context) -> Result<u64> {
        let count = self.options.extern_patch;
        let (first, rest) = self
            .reserve(ctx, count)
            .await?
            .split_first()
            .ok_or(Error::not_found(OP_NEXT))?;

        if !rest.is_empty() {
            if let Err(_e) = self.shared.fill_ids(ctx, &rest.to_vec()).await {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    tier = "shared",
                    batch = count,
                    first,
                    error = %_e,
                    "fill failed, degrading to local tier"
                );
                self.mark_shared_unavailable();
            }
        }
        Ok(first)
    }

    /// Local tier is empty: take a local batch, keep the head, buffer the rest.
    async fn refill_local(&self, ctx: &Context) -> Result<u64> {
        let count = self.options.local_patch;
        let (first, rest) = self
            .reserve(ctx, count)
            .await?
            .split_first()
            .ok_or(Error::not_found(OP_NEXT))?;

        if !rest.is_empty() {
            if let Err(_e) = self.local.fill_ids(ctx, &rest.to_vec()).await {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    tier = "local",
                    batch = count,
                    first,
                    error = %_e,
                    "fill failed, remainder of batch dropped"
                );
            }
        }
        Ok(first)
    }

    async fn reserve(&self, ctx: &Context, count: u64) -> Result<Batch> {
        self.store.get_batch(ctx, count).await.inspect_err(|_e| {
            #[cfg(feature = "tracing")]
            tracing::error!(tier = "durable", batch = count, error = %_e, "reservation failed");
        })
    }
}
