use std::fmt;
use std::sync::atomic::{AtomicIsize, AtomicU64, Ordering};

/// Gauge that also remembers the highest value it has reached.
pub struct Counter {
    current: AtomicIsize,
    max: AtomicIsize,
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, r#"{{ "count":{}, "max":{} }}"#, self.count(), self.max())
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl Counter {
    #[inline]
    pub const fn new() -> Self {
        Counter { current: AtomicIsize::new(0), max: AtomicIsize::new(0) }
    }

    #[inline]
    pub fn inc(&self) {
        let prev = self.current.fetch_add(1, Ordering::SeqCst);
        self.max.fetch_max(prev + 1, Ordering::SeqCst);
    }

    #[inline]
    pub fn dec(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn count(&self) -> isize {
        self.current.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn max(&self) -> isize {
        self.max.load(Ordering::SeqCst)
    }
}

/// Counts dropped work and decides when a warning is due.
///
/// A warning is due on the first drop and then on every `every`-th one.
pub struct DropTally {
    count: AtomicU64,
    every: u64,
}

impl fmt::Debug for DropTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DropTally({})", self.total())
    }
}

impl Default for DropTally {
    fn default() -> Self {
        Self::new(DropTally::DEFAULT_EVERY)
    }
}

impl DropTally {
    pub const DEFAULT_EVERY: u64 = 50;

    #[inline]
    pub const fn new(every: u64) -> Self {
        DropTally { count: AtomicU64::new(0), every: if every == 0 { 1 } else { every } }
    }

    /// Records one drop, returns the running total when this drop should be logged.
    #[inline]
    pub fn record(&self) -> Option<u64> {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if n == 1 || n % self.every == 0 {
            Some(n)
        } else {
            None
        }
    }

    #[inline]
    pub fn total(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}
