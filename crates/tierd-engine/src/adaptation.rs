//! Threshold Adaptation Engine
//!
//! Recomputes a tenant's hot/cold cutoffs from its aggregated histograms and
//! the room left on its fast tier. The computation is pure; the accounting
//! engine gathers the input under the tenant-tier locks and writes the result
//! back.

use serde::Serialize;
use tierd_core::{AccountingConfig, AdaptationConfig, SplitConfig, MAX_BUCKET, SUBUNITS_PER_LARGE};

use crate::histogram::{HotnessHistogram, SkewDistribution};
use crate::split::SplitState;
use crate::watermark::WatermarkCalculator;

/// Hot/cold cutoffs of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Thresholds {
    /// Units at or above this bucket are fast-eligible
    pub hot: u8,
    /// Same cutoff computed from base-granular estimates
    pub base_hot: u8,
    /// Anonymous units at or above this bucket are kept on the fast tier
    pub warm: u8,
}

impl Thresholds {
    /// All cutoffs at `bucket`.
    #[must_use]
    pub fn uniform(bucket: u8) -> Self {
        Self {
            hot: bucket,
            base_hot: bucket,
            warm: bucket,
        }
    }
}

/// Aggregated view of a tenant handed to [`ThresholdAdapter::compute`].
#[derive(Debug, Clone, Copy)]
pub struct AdaptationInput<'a> {
    /// Page-granular histogram summed over the tenant's tiers
    pub histogram: &'a HotnessHistogram,
    /// Base-granular estimate summed over the tenant's tiers
    pub estimated_base_histogram: &'a HotnessHistogram,
    /// Skew distribution summed over the tenant's tiers
    pub skew_distribution: &'a SkewDistribution,
    /// Capacity of the tenant's fast tier in pages
    pub fast_capacity: u64,
    /// Cutoffs in force before this pass
    pub current: Thresholds,
    /// Current split state
    pub split: SplitState,
    /// A decay event happened since the last pass
    pub post_decay: bool,
}

/// New cutoffs and the figures that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdaptationOutcome {
    /// Cutoffs to install
    pub thresholds: Thresholds,
    /// Split state to install
    pub split: SplitState,
    /// Fast-tier pages available to hot units
    pub available_pages: u64,
    /// Pages at or above the installed hot cutoff
    pub hot_pages: u64,
    /// Fast tier is under-filled and the warm cutoff was lowered
    pub warming: bool,
    /// Pass ran in post-decay mode
    pub post_decay: bool,
}

impl AdaptationOutcome {
    /// Returns `true` if the hot or warm cutoff moved.
    #[must_use]
    pub fn placement_changed(&self, before: &Thresholds) -> bool {
        self.thresholds.hot != before.hot || self.thresholds.warm != before.warm
    }
}

/// Capacity-driven threshold computation.
#[derive(Debug, Clone)]
pub struct ThresholdAdapter {
    min_hot_threshold: u8,
    adaptation: AdaptationConfig,
    split_enabled: bool,
    watermarks: WatermarkCalculator,
}

impl ThresholdAdapter {
    /// Creates an adapter.
    #[must_use]
    pub fn new(
        accounting: &AccountingConfig,
        adaptation: &AdaptationConfig,
        split: &SplitConfig,
        watermarks: WatermarkCalculator,
    ) -> Self {
        Self {
            min_hot_threshold: accounting.min_hot_threshold,
            adaptation: adaptation.clone(),
            split_enabled: split.enabled,
            watermarks,
        }
    }

    /// Computes new cutoffs for one tenant.
    #[must_use]
    pub fn compute(&self, input: &AdaptationInput<'_>) -> AdaptationOutcome {
        let available = self.watermarks.available_for_hot(input.fast_capacity);

        let hot_candidate = self.candidate(input.histogram, available);
        let base_candidate = self.candidate(input.estimated_base_histogram, available);

        let (hot, base_hot) = if input.post_decay {
            (
                self.step_down(input.current.hot, hot_candidate),
                self.step_down(input.current.base_hot, base_candidate),
            )
        } else {
            (input.current.hot.max(hot_candidate), base_candidate)
        };

        let hot_pages = input.histogram.pages_at_or_above(hot);
        let warm_limit = available.saturating_mul(self.adaptation.warm_fill_percent) / 100;
        let warming = self.adaptation.warm_enabled && hot_pages < warm_limit;
        let warm = if warming { hot.saturating_sub(1) } else { hot };

        let split = self.split_budget(input, hot, base_hot);

        AdaptationOutcome {
            thresholds: Thresholds {
                hot,
                base_hot,
                warm,
            },
            split,
            available_pages: available,
            hot_pages,
            warming,
            post_decay: input.post_decay,
        }
    }

    /// Bucket one above where the hottest-first walk overflows `available`.
    fn candidate(&self, histogram: &HotnessHistogram, available: u64) -> u8 {
        let mut accumulated = 0u64;
        let mut cutoff = 0;
        for (bin, pages) in histogram.iter_hottest_first() {
            accumulated = accumulated.saturating_add(pages);
            if accumulated > available {
                cutoff = if bin == MAX_BUCKET { MAX_BUCKET } else { bin + 1 };
                break;
            }
        }
        cutoff.max(self.min_hot_threshold)
    }

    /// Post-decay correction: never up, at most one bucket down.
    fn step_down(&self, current: u8, candidate: u8) -> u8 {
        if candidate < current {
            current.saturating_sub(1).max(self.min_hot_threshold)
        } else {
            current
        }
    }

    /// Split demand is the hot volume the base-granular view sees beyond the
    /// large-granular view. The most skewed large units absorb it first.
    fn split_budget(&self, input: &AdaptationInput<'_>, hot: u8, base_hot: u8) -> SplitState {
        let mut state = input.split;
        if !self.split_enabled {
            return SplitState::new(state.threshold);
        }

        let base_hot_pages = input.estimated_base_histogram.pages_at_or_above(base_hot);
        let large_hot_pages = input.histogram.pages_at_or_above(hot);
        let demand = base_hot_pages.saturating_sub(large_hot_pages);
        if demand == 0 {
            state.budget = 0;
            state.budget_tail = 0;
            return state;
        }

        let unit_pages = SUBUNITS_PER_LARGE as u64;
        let mut accumulated = 0u64;
        let mut threshold = 1;
        for (bin, units) in input.skew_distribution.iter_most_skewed_first() {
            let next = accumulated.saturating_add(units.saturating_mul(unit_pages));
            if next > demand {
                threshold = bin + 1;
                break;
            }
            accumulated = next;
        }

        SplitState {
            threshold,
            budget: accumulated,
            budget_tail: demand - accumulated,
        }
    }
}
