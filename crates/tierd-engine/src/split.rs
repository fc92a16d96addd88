//! Fragmentation/Split Advisor
//!
//! Decides whether a large unit whose sub-unit hotness is skewed should be
//! broken up before it migrates. The advisor only approves and charges the
//! budget; the scheduler queues the request to the [`SplitExecutor`].
//!
//! [`SplitExecutor`]: crate::placement::SplitExecutor

use serde::Serialize;
use tierd_core::metrics::SPLIT_DECISIONS;
use tierd_core::{SplitConfig, SUBUNITS_PER_LARGE};

use crate::record::LargeUnitSummary;

/// Split threshold and remaining budgets of a tenant-tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SplitState {
    /// Skew bucket cutoff; units at `threshold - 1` are boundary units
    pub threshold: u8,
    /// Pages that may still be split from units above the boundary
    pub budget: u64,
    /// Pages that may still be split from boundary units
    pub budget_tail: u64,
}

impl SplitState {
    /// No budget, cutoff at `threshold`.
    #[must_use]
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold,
            budget: 0,
            budget_tail: 0,
        }
    }

    fn boundary(&self) -> u8 {
        self.threshold.saturating_sub(1)
    }
}

/// Budget pool an approved split was charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPool {
    /// Units strictly above the boundary bucket
    Regular,
    /// Units exactly at the boundary bucket
    Tail,
}

/// Why a split was not offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitDenial {
    /// Splitting is turned off
    Disabled,
    /// Unit is already waiting for the split executor
    AlreadyQueued,
    /// Skew is below the boundary bucket
    BelowThreshold,
    /// The matching pool is exhausted
    NoBudget,
}

/// Advisor verdict for one large unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitDecision {
    /// Queue the unit; the pool has been charged
    Approved(BudgetPool),
    /// Leave the unit alone
    Denied(SplitDenial),
}

impl SplitDecision {
    /// Returns `true` for approvals.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, SplitDecision::Approved(_))
    }

    fn label(&self) -> &'static str {
        match self {
            SplitDecision::Approved(BudgetPool::Regular) => "approved",
            SplitDecision::Approved(BudgetPool::Tail) => "approved_tail",
            SplitDecision::Denied(SplitDenial::Disabled) => "disabled",
            SplitDecision::Denied(SplitDenial::AlreadyQueued) => "already_queued",
            SplitDecision::Denied(SplitDenial::BelowThreshold) => "below_threshold",
            SplitDecision::Denied(SplitDenial::NoBudget) => "no_budget",
        }
    }
}

/// Budget-gated split advisor.
#[derive(Debug, Clone)]
pub struct SplitAdvisor {
    enabled: bool,
}

impl SplitAdvisor {
    /// Creates an advisor from split configuration.
    #[must_use]
    pub fn new(config: &SplitConfig) -> Self {
        Self {
            enabled: config.enabled,
        }
    }

    /// Evaluates `summary` against the tenant-tier split state.
    ///
    /// On approval the matching pool is charged one large unit worth of pages
    /// (floored at zero) and the unit is marked queued.
    pub fn advise(&self, summary: &mut LargeUnitSummary, state: &mut SplitState) -> SplitDecision {
        let decision = self.decide(summary, state);

        if let SplitDecision::Approved(pool) = decision {
            let pages = SUBUNITS_PER_LARGE as u64;
            match pool {
                BudgetPool::Regular => state.budget = state.budget.saturating_sub(pages),
                BudgetPool::Tail => state.budget_tail = state.budget_tail.saturating_sub(pages),
            }
            summary.split_queued = true;
        }

        SPLIT_DECISIONS.with_label_values(&[decision.label()]).inc();
        decision
    }

    fn decide(&self, summary: &LargeUnitSummary, state: &SplitState) -> SplitDecision {
        if !self.enabled {
            return SplitDecision::Denied(SplitDenial::Disabled);
        }
        if summary.split_queued {
            return SplitDecision::Denied(SplitDenial::AlreadyQueued);
        }

        let boundary = state.boundary();
        if summary.skew_bucket < boundary {
            return SplitDecision::Denied(SplitDenial::BelowThreshold);
        }

        if summary.skew_bucket > boundary {
            if state.budget == 0 {
                return SplitDecision::Denied(SplitDenial::NoBudget);
            }
            SplitDecision::Approved(BudgetPool::Regular)
        } else {
            if state.budget_tail == 0 {
                return SplitDecision::Denied(SplitDenial::NoBudget);
            }
            SplitDecision::Approved(BudgetPool::Tail)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary_with_skew(skew: u8) -> LargeUnitSummary {
        let mut summary = LargeUnitSummary::new(0, 0);
        summary.skew_bucket = skew;
        summary
    }

    fn advisor() -> SplitAdvisor {
        SplitAdvisor::new(&SplitConfig::default())
    }

    #[test]
    fn test_denied_without_budget_even_when_skewed() {
        let mut summary = summary_with_skew(18);
        let mut state = SplitState {
            threshold: 10,
            budget: 0,
            budget_tail: 4096,
        };

        let decision = advisor().advise(&mut summary, &mut state);

        assert_eq!(decision, SplitDecision::Denied(SplitDenial::NoBudget));
        assert!(!summary.split_queued);
        assert_eq!(state.budget_tail, 4096);
    }

    #[test]
    fn test_approval_charges_regular_pool() {
        let mut summary = summary_with_skew(12);
        let mut state = SplitState {
            threshold: 10,
            budget: 700,
            budget_tail: 0,
        };

        let decision = advisor().advise(&mut summary, &mut state);

        assert_eq!(decision, SplitDecision::Approved(BudgetPool::Regular));
        assert!(summary.split_queued);
        assert_eq!(state.budget, 188);

        // A second offer of the same unit is refused
        let again = advisor().advise(&mut summary, &mut state);
        assert_eq!(again, SplitDecision::Denied(SplitDenial::AlreadyQueued));
    }

    #[test]
    fn test_boundary_unit_uses_tail_pool() {
        let mut summary = summary_with_skew(9);
        let mut state = SplitState {
            threshold: 10,
            budget: 10_000,
            budget_tail: 100,
        };

        let decision = advisor().advise(&mut summary, &mut state);

        assert_eq!(decision, SplitDecision::Approved(BudgetPool::Tail));
        assert_eq!(state.budget, 10_000);
        assert_eq!(state.budget_tail, 0);
    }

    #[test]
    fn test_below_threshold_and_disabled() {
        let mut state = SplitState {
            threshold: 10,
            budget: 10_000,
            budget_tail: 10_000,
        };
        let mut cold = summary_with_skew(3);
        assert_eq!(
            advisor().advise(&mut cold, &mut state),
            SplitDecision::Denied(SplitDenial::BelowThreshold)
        );

        let disabled = SplitAdvisor::new(&SplitConfig {
            enabled: false,
            ..SplitConfig::default()
        });
        let mut hot = summary_with_skew(20);
        assert_eq!(
            disabled.advise(&mut hot, &mut state),
            SplitDecision::Denied(SplitDenial::Disabled)
        );
        assert_eq!(state.budget, 10_000);
    }
}
