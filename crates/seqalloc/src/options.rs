//! Tuning knobs for [`Allocator`](crate::Allocator).
//!
//! All values have defaults matching a typical URL-shortener deployment. A
//! field left at zero is treated as unset and replaced by its default in
//! [`AllocatorOptions::with_defaults`], so partially specified options (for
//! example from environment variables) behave predictably.

use crate::retry::RetryPolicy;
use core::time::Duration;

/// Default number of attempts for retried shared-tier operations.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay between retries.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Default number of ids reserved from the durable store to refill the
/// shared tier.
pub const DEFAULT_EXTERN_PATCH: u64 = 1000;

/// Default low-water mark of the shared tier.
pub const DEFAULT_CACHE_THRESHOLD: usize = 20;

/// Default low-water mark of the local tier.
pub const DEFAULT_LOCAL_THRESHOLD: usize = 30;

/// Default number of ids reserved from the durable store to refill the local
/// tier.
pub const DEFAULT_LOCAL_PATCH: u64 = 500;

/// Immutable allocator configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocatorOptions {
    /// Attempts made by retried shared-tier operations (probe, threshold
    /// check).
    pub max_retries: u32,
    /// Base delay of the exponential backoff between attempts.
    pub retry_backoff: Duration,
    /// Batch size reserved when the shared tier runs dry.
    pub extern_patch: u64,
    /// Occupancy below which the shared tier is topped up.
    pub cache_threshold: usize,
    /// Occupancy below which the local tier is topped up.
    pub local_threshold: usize,
    /// Batch size reserved when the local tier runs dry.
    pub local_patch: u64,
}

impl Default for AllocatorOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            extern_patch: DEFAULT_EXTERN_PATCH,
            cache_threshold: DEFAULT_CACHE_THRESHOLD,
            local_threshold: DEFAULT_LOCAL_THRESHOLD,
            local_patch: DEFAULT_LOCAL_PATCH,
        }
    }
}

impl AllocatorOptions {
    /// Replaces every zero field with its default.
    #[must_use]
    pub fn with_defaults(self) -> Self {
        let d = Self::default();
        Self {
            max_retries: non_zero_or(self.max_retries, d.max_retries),
            retry_backoff: non_zero_or(self.retry_backoff, d.retry_backoff),
            extern_patch: non_zero_or(self.extern_patch, d.extern_patch),
            cache_threshold: non_zero_or(self.cache_threshold, d.cache_threshold),
            local_threshold: non_zero_or(self.local_threshold, d.local_threshold),
            local_patch: non_zero_or(self.local_patch, d.local_patch),
        }
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub const fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    #[must_use]
    pub const fn with_extern_patch(mut self, extern_patch: u64) -> Self {
        self.extern_patch = extern_patch;
        self
    }

    #[must_use]
    pub const fn with_cache_threshold(mut self, cache_threshold: usize) -> Self {
        self.cache_threshold = cache_threshold;
        self
    }

    #[must_use]
    pub const fn with_local_threshold(mut self, local_threshold: usize) -> Self {
        self.local_threshold = local_threshold;
        self
    }

    #[must_use]
    pub const fn with_local_patch(mut self, local_patch: u64) -> Self {
        self.local_patch = local_patch;
        self
    }

    /// The retry policy used for shared-tier maintenance calls.
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_backoff)
    }
}

fn non_zero_or<T: Default + PartialEq>(value: T, default: T) -> T {
    if value == T::default() { default } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_options_take_defaults() {
        let zeroed = AllocatorOptions {
            max_retries: 0,
            retry_backoff: Duration::ZERO,
            extern_patch: 0,
            cache_threshold: 0,
            local_threshold: 0,
            local_patch: 0,
        };
        let opts = zeroed.with_defaults();

        assert_eq!(opts.max_retries, 3);
        assert_eq!(opts.retry_backoff, Duration::from_millis(50));
        assert_eq!(opts.extern_patch, 1000);
        assert_eq!(opts.cache_threshold, 20);
        assert_eq!(opts.local_threshold, 30);
        assert_eq!(opts.local_patch, 500);
    }

    #[test]
    fn explicit_options_are_kept() {
        let opts = AllocatorOptions::default()
            .with_max_retries(5)
            .with_retry_backoff(Duration::from_millis(100))
            .with_extern_patch(2000)
            .with_cache_threshold(40)
            .with_local_threshold(60)
            .with_local_patch(1000)
            .with_defaults();

        assert_eq!(opts.max_retries, 5);
        assert_eq!(opts.retry_backoff, Duration::from_millis(100));
        assert_eq!(opts.extern_patch, 2000);
        assert_eq!(opts.cache_threshold, 40);
        assert_eq!(opts.local_threshold, 60);
        assert_eq!(opts.local_patch, 1000);
    }
}
