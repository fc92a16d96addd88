//! Per-unit access records.

use serde::{Deserialize, Serialize};
use tierd_core::SUBUNITS_PER_LARGE;

use crate::bucket::{bucket, skew_bucket};

/// Access accounting for one base unit, or one sub-unit of a large unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccessRecord {
    /// Accesses since the last decay event touched this record
    pub recent_accesses: u32,
    /// Exponentially decayed access weight; histogram buckets key on this
    pub decayed_total: u64,
    /// Decay generation this record was last normalized against
    pub last_decay_generation: u64,
    /// Last classification against the base hot threshold
    pub predicted_hot: bool,
}

impl AccessRecord {
    /// Creates a record carrying `decayed_total` at `generation`.
    #[must_use]
    pub fn seeded(decayed_total: u64, generation: u64) -> Self {
        Self {
            decayed_total,
            last_decay_generation: generation,
            ..Self::default()
        }
    }

    /// Current hotness bucket.
    #[must_use]
    pub fn bin(&self) -> u8 {
        bucket(self.decayed_total)
    }

    /// Counts one sampled access of `weight`.
    pub fn touch(&mut self, weight: u64) {
        self.recent_accesses = self.recent_accesses.saturating_add(1);
        self.decayed_total = self.decayed_total.saturating_add(weight);
    }

    /// Halves the decayed total `diff` times.
    pub fn cool(&mut self, diff: u64) {
        if diff == 0 {
            return;
        }
        for _ in 0..diff {
            if self.decayed_total == 0 {
                break;
            }
            self.decayed_total >>= 1;
        }
        self.recent_accesses = 0;
    }
}

/// Aggregated accounting for a large unit and its sub-units.
#[derive(Debug, Clone, Serialize)]
pub struct LargeUnitSummary {
    #[serde(skip)]
    subunits: Box<[AccessRecord; SUBUNITS_PER_LARGE]>,
    /// Coarse decayed total of the whole unit
    pub decayed_total: u64,
    /// Cached hotness bucket of `decayed_total`
    pub current_bin: u8,
    /// Sub-units at or above the base hot threshold
    pub hot_subunit_count: u16,
    /// Skew bucket from the last decay
    pub skew_bucket: u8,
    /// Decay generation the whole unit was last normalized against
    pub last_decay_generation: u64,
    /// Already handed to the split queue
    pub split_queued: bool,
}

impl LargeUnitSummary {
    /// Creates a summary seeded at `decayed_total` with zeroed sub-units.
    #[must_use]
    pub fn new(decayed_total: u64, generation: u64) -> Self {
        Self {
            subunits: Box::new([AccessRecord::seeded(0, generation); SUBUNITS_PER_LARGE]),
            decayed_total,
            current_bin: bucket(decayed_total),
            hot_subunit_count: 0,
            skew_bucket: 0,
            last_decay_generation: generation,
            split_queued: false,
        }
    }

    /// Sub-unit record at `index`.
    #[must_use]
    pub fn subunit(&self, index: usize) -> &AccessRecord {
        &self.subunits[index % SUBUNITS_PER_LARGE]
    }

    /// Mutable sub-unit record at `index`.
    pub fn subunit_mut(&mut self, index: usize) -> &mut AccessRecord {
        &mut self.subunits[index % SUBUNITS_PER_LARGE]
    }

    /// All sub-unit records in address order.
    pub fn subunits(&self) -> impl Iterator<Item = &AccessRecord> {
        self.subunits.iter()
    }

    /// Counts one access of `weight` on sub-unit `index`.
    ///
    /// Returns the sub-unit bucket before and after.
    pub fn touch(&mut self, index: usize, weight: u64) -> (u8, u8) {
        self.decayed_total = self.decayed_total.saturating_add(weight);
        let sub = self.subunit_mut(index);
        let before = sub.bin();
        sub.touch(weight);
        (before, sub.bin())
    }

    /// Applies `diff` decay steps to the unit and every sub-unit.
    ///
    /// `republish` receives `(old_bin, new_bin)` for each sub-unit. Hot
    /// sub-unit count and skew are recomputed against `base_hot_threshold`.
    pub fn cool(
        &mut self,
        diff: u64,
        generation: u64,
        base_hot_threshold: u8,
        mut republish: impl FnMut(u8, u8),
    ) {
        for _ in 0..diff {
            if self.decayed_total == 0 {
                break;
            }
            self.decayed_total >>= 1;
        }

        let mut hot = 0u16;
        let mut squares = 0u64;
        for sub in self.subunits.iter_mut() {
            let before = sub.bin();
            sub.cool(diff);
            sub.last_decay_generation = generation;
            let after = sub.bin();
            sub.predicted_hot = after >= base_hot_threshold;
            if sub.predicted_hot {
                hot += 1;
            }
            squares = squares.saturating_add(sub.decayed_total.saturating_mul(sub.decayed_total));
            republish(before, after);
        }

        self.hot_subunit_count = hot;
        self.skew_bucket = skew_bucket(squares / u64::from(hot.max(1)));
        self.last_decay_generation = generation;
    }

    /// Consumes the summary, yielding the sub-unit records in address order.
    #[must_use]
    pub fn into_subunits(self) -> Box<[AccessRecord; SUBUNITS_PER_LARGE]> {
        self.subunits
    }
}

/// What kind of memory backs a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backing {
    /// Anonymous memory.
    Anon,
    /// File-backed (page cache) memory.
    File,
}

/// Granularity of a unit at attach time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitSize {
    /// One base page.
    Base,
    /// A large unit of 512 base pages.
    Large,
}

/// Accounting payload of a tracked unit.
#[derive(Debug, Clone)]
pub enum UnitKind {
    /// A single base unit.
    Base(AccessRecord),
    /// A large unit with per-sub-unit records.
    Large(Box<LargeUnitSummary>),
}

/// A unit tracked on one tier.
#[derive(Debug, Clone)]
pub struct TrackedUnit {
    /// Access records
    pub kind: UnitKind,
    /// Backing memory type
    pub backing: Backing,
    /// Hotness bucket currently counted in the tier histogram
    pub cached_bin: u8,
    /// Last placement request sent the unit to the fast-eligible list
    pub fast_eligible: bool,
}

impl TrackedUnit {
    /// Base pages this unit accounts for.
    #[must_use]
    pub fn pages(&self) -> u64 {
        match &self.kind {
            UnitKind::Base(_) => 1,
            UnitKind::Large(_) => SUBUNITS_PER_LARGE as u64,
        }
    }

    /// Decay generation the unit was last normalized against.
    #[must_use]
    pub fn last_decay_generation(&self) -> u64 {
        match &self.kind {
            UnitKind::Base(record) => record.last_decay_generation,
            UnitKind::Large(summary) => summary.last_decay_generation,
        }
    }

    /// Hotness bucket of the unit-level counter.
    #[must_use]
    pub fn current_bin(&self) -> u8 {
        match &self.kind {
            UnitKind::Base(record) => record.bin(),
            UnitKind::Large(summary) => bucket(summary.decayed_total),
        }
    }

    /// Returns `true` for large units.
    #[must_use]
    pub fn is_large(&self) -> bool {
        matches!(self.kind, UnitKind::Large(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cool_with_zero_diff_is_identity() {
        let mut record = AccessRecord::seeded(37, 4);
        record.touch(1);
        let before = record;
        record.cool(0);
        assert_eq!(record, before);
    }

    #[test]
    fn test_cool_halves_per_step() {
        let mut record = AccessRecord::seeded(100, 0);
        record.cool(1);
        assert_eq!(record.decayed_total, 50);
        record.cool(3);
        assert_eq!(record.decayed_total, 6);
        record.cool(1000);
        assert_eq!(record.decayed_total, 0);
        assert_eq!(record.recent_accesses, 0);
    }

    #[test]
    fn test_small_counts_saturate_at_zero() {
        let mut record = AccessRecord::seeded(1, 0);
        record.cool(1);
        assert_eq!(record.decayed_total, 0);
        assert_eq!(record.bin(), 0);
    }

    #[test]
    fn test_large_touch_reports_subunit_bins() {
        let mut summary = LargeUnitSummary::new(0, 0);
        assert_eq!(summary.touch(5, 1), (0, 1));
        assert_eq!(summary.touch(5, 1), (1, 1));
        assert_eq!(summary.touch(5, 1), (1, 2));
        assert_eq!(summary.decayed_total, 3);
        assert_eq!(summary.subunit(5).recent_accesses, 3);
    }

    #[test]
    fn test_large_cool_recomputes_skew() {
        let mut summary = LargeUnitSummary::new(0, 0);
        for _ in 0..64 {
            summary.touch(0, 1);
        }
        for _ in 0..4 {
            summary.touch(1, 1);
        }

        let mut republished = 0;
        summary.cool(1, 1, 2, |_, _| republished += 1);

        assert_eq!(republished, SUBUNITS_PER_LARGE);
        assert_eq!(summary.decayed_total, 34);
        assert_eq!(summary.subunit(0).decayed_total, 32);
        assert_eq!(summary.subunit(1).decayed_total, 2);
        // bucket(32) = 5 and bucket(2) = 1: only sub-unit 0 is hot
        assert_eq!(summary.hot_subunit_count, 1);
        // (32^2 + 2^2) / 1 = 1028
        assert_eq!(summary.skew_bucket, skew_bucket(1028));
        assert_eq!(summary.last_decay_generation, 1);
    }

    #[test]
    fn test_tracked_unit_pages() {
        let base = TrackedUnit {
            kind: UnitKind::Base(AccessRecord::default()),
            backing: Backing::Anon,
            cached_bin: 0,
            fast_eligible: false,
        };
        let large = TrackedUnit {
            kind: UnitKind::Large(Box::new(LargeUnitSummary::new(0, 0))),
            backing: Backing::Anon,
            cached_bin: 0,
            fast_eligible: false,
        };
        assert_eq!(base.pages(), 1);
        assert_eq!(large.pages(), 512);
        assert!(large.is_large());
    }
}
