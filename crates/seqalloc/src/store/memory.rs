use super::{Batch, SequenceStore};
use crate::{
    context::Context,
    error::{Error, Result},
};
use portable_atomic::{AtomicU64, Ordering};

/// A process-local durable store backed by an atomic counter.
///
/// Ranges are carved out with a single `fetch_update`, so concurrent callers
/// always receive disjoint batches. Nothing survives a restart; use it for
/// tests, benches, and single-process development.
#[derive(Debug)]
pub struct MemorySequenceStore {
    next: AtomicU64,
    reservations: AtomicU64,
}

impl Default for MemorySequenceStore {
    fn default() -> Self {
        Self::new(1)
    }
}

impl MemorySequenceStore {
    /// Creates a store whose first reserved id is `start`.
    pub const fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
            reservations: AtomicU64::new(0),
        }
    }

    /// The next id that would be reserved.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }

    /// Number of non-empty reservations served so far.
    pub fn reservations(&self) -> u64 {
        self.reservations.load(Ordering::Relaxed)
    }

    fn reserve(&self, count: u64) -> Result<Batch> {
        if count == 0 {
            return Ok(Batch::empty());
        }
        let first = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                cur.checked_add(count)
            })
            .map_err(|cur| {
                Error::system(
                    "memory reserve",
                    format!("counter at {cur} cannot advance by {count}"),
                )
            })?;
        self.reservations.fetch_add(1, Ordering::Relaxed);
        Ok(Batch::new(first, count))
    }
}

impl SequenceStore for MemorySequenceStore {
    async fn get_batch(&self, ctx: &Context, count: u64) -> Result<Batch> {
        if ctx.is_expired() {
            return Err(Error::timeout("memory reserve"));
        }
        self.reserve(count)
    }
}
