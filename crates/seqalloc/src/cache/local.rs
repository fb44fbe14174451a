use super::SequenceCache;
use crate::{
    context::Context,
    error::{Error, Result},
};
use core::time::Duration;
use tokio::sync::RwLock;

/// Capacity used when a local cache is created with a capacity of zero.
pub const DEFAULT_LOCAL_CAPACITY: usize = 1000;

/// Largest capacity a local cache accepts. Larger requests are clamped.
pub const MAX_LOCAL_CAPACITY: usize = 1 << 20;

/// Upper bound on any single local cache operation, applied on top of the
/// caller's deadline.
pub const DEFAULT_LOCAL_OP_TIMEOUT: Duration = Duration::from_millis(100);

const OP_GET: &str = "local get";
const OP_FILL: &str = "local fill";
const OP_LEN: &str = "local len";
const OP_PROBE: &str = "local probe";

/// Bounded FIFO over `capacity + 1` slots. One slot always stays free so that
/// `head == tail` unambiguously means empty.
#[derive(Debug)]
struct Ring {
    ids: Box<[u64]>,
    head: usize,
    tail: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            ids: vec![0; capacity + 1].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    fn slots(&self) -> usize {
        self.ids.len()
    }

    fn capacity(&self) -> usize {
        self.slots() - 1
    }

    fn len(&self) -> usize {
        (self.tail + self.slots() - self.head) % self.slots()
    }

    fn pop(&mut self) -> Option<u64> {
        if self.head == self.tail {
            return None;
        }
        let id = self.ids[self.head];
        self.head = (self.head + 1) % self.slots();
        Some(id)
    }

    /// Appends as many of `ids` as fit and returns how many were accepted.
    fn push_slice(&mut self, ids: &[u64]) -> usize {
        let accepted = ids.len().min(self.capacity() - self.len());
        for &id in &ids[..accepted] {
            self.ids[self.tail] = id;
            self.tail = (self.tail + 1) % self.slots();
        }
        accepted
    }
}

/// Fixed-capacity, in-process ring buffer of pre-fetched identifiers.
///
/// The buffer never grows: a fill that does not fit is truncated and the
/// excess ids are dropped (they are simply never issued). Contents are
/// volatile and lost on restart.
///
/// The ring is guarded by an async [`RwLock`] so that lock acquisition itself
/// is bounded by the operation deadline. Every operation runs under the
/// earlier of the caller's deadline and the cache's own operation timeout, and
/// reports [`Error::Timeout`] instead of hanging on contention.
#[derive(Debug)]
pub struct LocalSequenceCache {
    ring: RwLock<Ring>,
    op_timeout: Duration,
}

impl Default for LocalSequenceCache {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_CAPACITY)
    }
}

impl LocalSequenceCache {
    /// Creates a cache holding at most `capacity` ids. A capacity of zero
    /// selects [`DEFAULT_LOCAL_CAPACITY`], and anything above
    /// [`MAX_LOCAL_CAPACITY`] is clamped to it.
    pub fn new(capacity: usize) -> Self {
        let capacity = match capacity {
            0 => DEFAULT_LOCAL_CAPACITY,
            n if n > MAX_LOCAL_CAPACITY => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    requested = n,
                    capacity = MAX_LOCAL_CAPACITY,
                    "local cache capacity clamped"
                );
                MAX_LOCAL_CAPACITY
            }
            n => n,
        };
        Self {
            ring: RwLock::new(Ring::new(capacity)),
            op_timeout: DEFAULT_LOCAL_OP_TIMEOUT,
        }
    }

    /// Overrides the per-operation bound.
    #[must_use]
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }

    /// Maximum number of ids the cache can hold.
    pub async fn capacity(&self) -> usize {
        self.ring.read().await.capacity()
    }

    /// Current number of buffered ids.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the lock could not be taken in time.
    pub async fn len(&self, ctx: &Context) -> Result<usize> {
        ctx.tightened(self.op_timeout)
            .run(OP_LEN, async { Ok(self.ring.read().await.len()) })
            .await
    }
}

impl SequenceCache for LocalSequenceCache {
    async fn get_single_id(&self, ctx: &Context) -> Result<u64> {
        ctx.tightened(self.op_timeout)
            .run(OP_GET, async {
                self.ring
                    .write()
                    .await
                    .pop()
                    .ok_or(Error::not_found(OP_GET))
            })
            .await
    }

    async fn fill_ids(&self, ctx: &Context, ids: &[u64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        ctx.tightened(self.op_timeout)
            .run(OP_FILL, async {
                let accepted = self.ring.write().await.push_slice(ids);
                if accepted < ids.len() {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        offered = ids.len(),
                        accepted,
                        dropped = ids.len() - accepted,
                        "local cache full, dropping surplus ids"
                    );
                }
                Ok(accepted)
            })
            .await
    }

    async fn is_ok(&self, ctx: &Context) -> bool {
        ctx.tightened(self.op_timeout)
            .run(OP_PROBE, async {
                drop(self.ring.read().await);
                Ok(())
            })
            .await
            .is_ok()
    }

    async fn is_less_than_threshold(&self, ctx: &Context, threshold: usize) -> Result<bool> {
        Ok(self.len(ctx).await? < threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::{collections::HashSet, sync::Arc};

    fn bg() -> Context {
        Context::background()
    }

    async fn drain(cache: &LocalSequenceCache) -> Vec<u64> {
        let mut out = Vec::new();
        loop {
            match cache.get_single_id(&bg()).await {
                Ok(id) => out.push(id),
                Err(e) => {
                    assert!(e.is_not_found(), "unexpected error: {e}");
                    return out;
                }
            }
        }
    }

    #[tokio::test]
    async fn zero_capacity_selects_default() {
        let cache = LocalSequenceCache::new(0);
        assert_eq!(cache.capacity().await, DEFAULT_LOCAL_CAPACITY);

        let cache = LocalSequenceCache::new(100);
        assert_eq!(cache.capacity().await, 100);
        assert_eq!(cache.ring.read().await.slots(), 101);
    }

    #[tokio::test]
    async fn oversized_capacity_is_clamped() {
        let cache = LocalSequenceCache::new(usize::MAX);
        assert_eq!(cache.capacity().await, MAX_LOCAL_CAPACITY);

        cache.fill_ids(&bg(), &[7, 8]).await.unwrap();
        assert_eq!(drain(&cache).await, vec![7, 8]);

        let cache = LocalSequenceCache::new(MAX_LOCAL_CAPACITY + 1);
        assert_eq!(cache.capacity().await, MAX_LOCAL_CAPACITY);
    }

    #[tokio::test]
    async fn empty_cache_reports_not_found() {
        let cache = LocalSequenceCache::new(10);
        let err = cache.get_single_id(&bg()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn drains_in_fill_order() {
        let cache = LocalSequenceCache::new(10);
        cache.fill_ids(&bg(), &[1, 2, 3]).await.unwrap();

        assert_eq!(cache.get_single_id(&bg()).await.unwrap(), 1);
        assert_eq!(cache.get_single_id(&bg()).await.unwrap(), 2);
        assert_eq!(cache.get_single_id(&bg()).await.unwrap(), 3);
        assert!(cache.get_single_id(&bg()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn wraps_around_and_keeps_fifo_order() {
        let cache = LocalSequenceCache::new(3);
        cache.fill_ids(&bg(), &[1, 2, 3]).await.unwrap();

        assert_eq!(cache.get_single_id(&bg()).await.unwrap(), 1);
        assert_eq!(cache.get_single_id(&bg()).await.unwrap(), 2);

        cache.fill_ids(&bg(), &[4, 5]).await.unwrap();
        assert_eq!(drain(&cache).await, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn overfill_truncates_to_capacity() {
        let cache = LocalSequenceCache::new(5);
        let accepted = cache
            .fill_ids(&bg(), &[1, 2, 3, 4, 5, 6, 7, 8])
            .await
            .unwrap();

        assert_eq!(accepted, 5);
        assert_eq!(cache.len(&bg()).await.unwrap(), 5);
        assert_eq!(drain(&cache).await, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn fill_into_full_cache_drops_everything() {
        let cache = LocalSequenceCache::new(2);
        assert_eq!(cache.fill_ids(&bg(), &[1, 2]).await.unwrap(), 2);
        assert_eq!(cache.fill_ids(&bg(), &[3]).await.unwrap(), 0);
        assert_eq!(drain(&cache).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn empty_fill_is_a_noop() {
        let cache = LocalSequenceCache::new(2);
        assert_eq!(cache.fill_ids(&bg(), &[]).await.unwrap(), 0);
        assert_eq!(cache.len(&bg()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn threshold_is_strict() {
        let t = 4;
        let cache = LocalSequenceCache::new(10);

        // occupancy 0
        assert!(cache.is_less_than_threshold(&bg(), t).await.unwrap());

        cache.fill_ids(&bg(), &[1, 2, 3]).await.unwrap();
        // occupancy t - 1
        assert!(cache.is_less_than_threshold(&bg(), t).await.unwrap());

        cache.fill_ids(&bg(), &[4]).await.unwrap();
        // occupancy t
        assert!(!cache.is_less_than_threshold(&bg(), t).await.unwrap());

        cache.fill_ids(&bg(), &[5]).await.unwrap();
        // occupancy t + 1
        assert!(!cache.is_less_than_threshold(&bg(), t).await.unwrap());
    }

    #[tokio::test]
    async fn is_ok_when_uncontended() {
        assert!(LocalSequenceCache::new(1).is_ok(&bg()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn contention_times_out_instead_of_hanging() {
        let cache = LocalSequenceCache::new(4).with_op_timeout(Duration::from_millis(20));
        cache.fill_ids(&bg(), &[1]).await.unwrap();

        let guard = cache.ring.write().await;

        let err = cache.get_single_id(&bg()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        let err = cache.fill_ids(&bg(), &[2]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        let err = cache.is_less_than_threshold(&bg(), 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        assert!(!cache.is_ok(&bg()).await);

        drop(guard);
        assert_eq!(cache.get_single_id(&bg()).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_deadline_wins_when_earlier() {
        let cache = LocalSequenceCache::new(4).with_op_timeout(Duration::from_secs(60));
        let _guard = cache.ring.write().await;

        let ctx = Context::with_timeout(Duration::from_millis(5));
        let err = cache.get_single_id(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_drain_hands_out_each_id_once() {
        const IDS: u64 = 4096;
        let cache = Arc::new(LocalSequenceCache::new(IDS as usize));
        let ids: Vec<u64> = (0..IDS).collect();
        cache.fill_ids(&bg(), &ids).await.unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    let mut got = Vec::new();
                    while let Ok(id) = cache.get_single_id(&Context::background()).await {
                        got.push(id);
                    }
                    got
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for ids in futures::future::try_join_all(tasks).await.unwrap() {
            for id in ids {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), IDS as usize);
    }
}
