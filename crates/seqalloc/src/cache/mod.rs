//! Prefetch tiers sitting in front of the durable store.
//!
//! Both tiers implement [`SequenceCache`]:
//!
//! - [`LocalSequenceCache`] - a fixed-capacity in-process ring buffer.
//! - [`RedisSequenceCache`] - a FIFO list in Redis shared by every process
//!   (feature `redis`).
//!
//! An empty tier reports [`Error::NotFound`](crate::Error::NotFound); any
//! other error means the tier itself is unhealthy.

mod local;
#[cfg(feature = "redis")]
mod shared;

pub use local::*;
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
#[cfg(feature = "redis")]
pub use shared::*;

use crate::{context::Context, error::Result};
use core::future::Future;
use std::sync::Arc;

/// A queue of pre-reserved identifiers.
pub trait SequenceCache: Send + Sync {
    /// Pops the oldest identifier.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`](crate::Error::NotFound) when the queue is empty.
    /// - [`Error::Cache`](crate::Error::Cache) or
    ///   [`Error::Timeout`](crate::Error::Timeout) when the tier is unhealthy.
    /// - [`Error::System`](crate::Error::System) for malformed stored values.
    fn get_single_id(&self, ctx: &Context) -> impl Future<Output = Result<u64>> + Send;

    /// Appends `ids` in order and returns how many were stored. A bounded
    /// tier stores a prefix of `ids` and drops the rest. Empty input is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the ids could not be stored. Callers must then
    /// assume nothing about what was stored.
    fn fill_ids(&self, ctx: &Context, ids: &[u64]) -> impl Future<Output = Result<usize>> + Send;

    /// Lightweight liveness probe.
    fn is_ok(&self, ctx: &Context) -> impl Future<Output = bool> + Send;

    /// `true` when the queue holds strictly fewer than `threshold` ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue length could not be read.
    fn is_less_than_threshold(
        &self,
        ctx: &Context,
        threshold: usize,
    ) -> impl Future<Output = Result<bool>> + Send;
}

impl<T> SequenceCache for Arc<T>
where
    T: SequenceCache,
{
    fn get_single_id(&self, ctx: &Context) -> impl Future<Output = Result<u64>> + Send {
        (**self).get_single_id(ctx)
    }

    fn fill_ids(&self, ctx: &Context, ids: &[u64]) -> impl Future<Output = Result<usize>> + Send {
        (**self).fill_ids(ctx, ids)
    }

    fn is_ok(&self, ctx: &Context) -> impl Future<Output = bool> + Send {
        (**self).is_ok(ctx)
    }

    fn is_less_than_threshold(
        &self,
        ctx: &Context,
        threshold: usize,
    ) -> impl Future<Output = Result<bool>> + Send {
        (**self).is_less_than_threshold(ctx, threshold)
    }
}
