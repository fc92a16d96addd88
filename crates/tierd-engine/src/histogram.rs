//! Histogram Store: fixed-size bucket arrays with invariant-preserving updates.
//!
//! Counts only change through `add`/`remove`/`transfer` or a full `reset`;
//! a transfer is always applied as decrement-then-increment so a reader that
//! holds the owning lock never sees a page counted twice or lost.

use serde::Serialize;

use crate::bucket::{HOTNESS_BUCKETS, SKEW_BUCKETS};

/// Page counts per hotness bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HotnessHistogram {
    counts: [u64; HOTNESS_BUCKETS],
}

impl HotnessHistogram {
    /// Creates an empty histogram.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a histogram from explicit `(bucket, pages)` pairs.
    #[must_use]
    pub fn from_pairs(pairs: &[(u8, u64)]) -> Self {
        let mut hist = Self::new();
        for &(bin, pages) in pairs {
            hist.add(bin, pages);
        }
        hist
    }

    /// Adds `pages` to `bin`.
    pub fn add(&mut self, bin: u8, pages: u64) {
        let slot = &mut self.counts[Self::slot(bin)];
        *slot = slot.saturating_add(pages);
    }

    /// Removes `pages` from `bin`, flooring at zero.
    ///
    /// Returns the number of pages that could not be removed.
    pub fn remove(&mut self, bin: u8, pages: u64) -> u64 {
        let slot = &mut self.counts[Self::slot(bin)];
        let removed = (*slot).min(pages);
        *slot -= removed;
        pages - removed
    }

    /// Moves `pages` from one bin to another.
    pub fn transfer(&mut self, from: u8, to: u8, pages: u64) {
        if from == to {
            return;
        }
        self.remove(from, pages);
        self.add(to, pages);
    }

    /// Zeroes every bucket.
    pub fn reset(&mut self) {
        self.counts = [0; HOTNESS_BUCKETS];
    }

    /// Pages in `bin`.
    #[must_use]
    pub fn get(&self, bin: u8) -> u64 {
        self.counts[Self::slot(bin)]
    }

    /// Total pages across all buckets.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Pages in buckets at or above `bin`.
    #[must_use]
    pub fn pages_at_or_above(&self, bin: u8) -> u64 {
        self.counts[Self::slot(bin)..].iter().sum()
    }

    /// Element-wise sum with another histogram.
    pub fn merge(&mut self, other: &HotnessHistogram) {
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts.iter()) {
            *mine = mine.saturating_add(*theirs);
        }
    }

    /// `(bucket, pages)` from the hottest bucket down.
    pub fn iter_hottest_first(&self) -> impl Iterator<Item = (u8, u64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .rev()
            .map(|(bin, &pages)| (bin as u8, pages))
    }

    fn slot(bin: u8) -> usize {
        usize::from(bin).min(HOTNESS_BUCKETS - 1)
    }
}

/// Large-unit counts per skew bucket, rebuilt between decay events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SkewDistribution {
    counts: [u64; SKEW_BUCKETS],
}

impl SkewDistribution {
    /// Counts one large unit in `bin`.
    pub fn record(&mut self, bin: u8) {
        let slot = usize::from(bin).min(SKEW_BUCKETS - 1);
        self.counts[slot] += 1;
    }

    /// Zeroes every bucket.
    pub fn reset(&mut self) {
        self.counts = [0; SKEW_BUCKETS];
    }

    /// Units in `bin`.
    #[must_use]
    pub fn get(&self, bin: u8) -> u64 {
        self.counts[usize::from(bin).min(SKEW_BUCKETS - 1)]
    }

    /// Element-wise sum with another distribution.
    pub fn merge(&mut self, other: &SkewDistribution) {
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts.iter()) {
            *mine += *theirs;
        }
    }

    /// `(bucket, units)` from the most skewed bucket down.
    pub fn iter_most_skewed_first(&self) -> impl Iterator<Item = (u8, u64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .rev()
            .map(|(bin, &units)| (bin as u8, units))
    }
}
