//! Durable allocation stores.
//!
//! A [`SequenceStore`] is the single source of truth for identifiers: it
//! atomically reserves a contiguous [`Batch`] and never hands out the same
//! range twice. Disjointness comes entirely from the store's own atomicity
//! (an atomic counter, or a SQL transaction); callers add no locking.

mod batch;
#[cfg(feature = "database")]
mod database;
mod memory;

pub use batch::*;
#[cfg_attr(docsrs, doc(cfg(feature = "database")))]
#[cfg(feature = "database")]
pub use database::*;
pub use memory::*;

use crate::{context::Context, error::Result};
use core::future::Future;
use std::sync::Arc;

/// A minimal interface for reserving identifier ranges.
pub trait SequenceStore: Send + Sync {
    /// Atomically reserves `count` identifiers.
    ///
    /// `count == 0` yields an empty batch without touching the backing store.
    ///
    /// # Errors
    ///
    /// - [`Error::Database`](crate::Error::Database) if the reservation
    ///   failed. No part of the range may be assumed reserved.
    /// - [`Error::Timeout`](crate::Error::Timeout) if `ctx` expired.
    fn get_batch(&self, ctx: &Context, count: u64) -> impl Future<Output = Result<Batch>> + Send;
}

impl<T> SequenceStore for Arc<T>
where
    T: SequenceStore,
{
    fn get_batch(&self, ctx: &Context, count: u64) -> impl Future<Output = Result<Batch>> + Send {
        (**self).get_batch(ctx, count)
    }
}
