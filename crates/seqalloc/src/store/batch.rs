use core::ops::Range;

/// A contiguous half-open range `[start, start + len)` of reserved ids.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Batch {
    start: u64,
    len: u64,
}

impl Batch {
    /// Creates a batch of `len` ids starting at `start`.
    ///
    /// The range must not overflow `u64`; see [`Self::try_new`] for a checked
    /// constructor.
    pub const fn new(start: u64, len: u64) -> Self {
        debug_assert!(start.checked_add(len).is_some());
        Self { start, len }
    }

    /// Creates a batch, or `None` if `start + len` overflows.
    pub const fn try_new(start: u64, len: u64) -> Option<Self> {
        match start.checked_add(len) {
            Some(_) => Some(Self { start, len }),
            None => None,
        }
    }

    pub const fn empty() -> Self {
        Self { start: 0, len: 0 }
    }

    pub const fn start(&self) -> u64 {
        self.start
    }

    /// One past the last id in the batch.
    pub const fn end(&self) -> u64 {
        self.start + self.len
    }

    pub const fn len(&self) -> u64 {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub const fn first(&self) -> Option<u64> {
        if self.is_empty() {
            None
        } else {
            Some(self.start)
        }
    }

    /// Splits off the first id, returning it with the remainder.
    pub const fn split_first(self) -> Option<(u64, Self)> {
        if self.is_empty() {
            None
        } else {
            Some((self.start, Self::new(self.start + 1, self.len - 1)))
        }
    }

    pub const fn contains(&self, id: u64) -> bool {
        id >= self.start && id < self.end()
    }

    /// `true` when no id belongs to both batches.
    pub const fn is_disjoint(&self, other: &Self) -> bool {
        self.is_empty()
            || other.is_empty()
            || self.end() <= other.start
            || other.end() <= self.start
    }

    pub const fn iter(&self) -> Range<u64> {
        self.start..self.end()
    }

    pub fn to_vec(&self) -> Vec<u64> {
        self.iter().collect()
    }
}

impl IntoIterator for Batch {
    type Item = u64;
    type IntoIter = Range<u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
