//! Adaptive tiered-memory placement engine.
//!
//! This crate provides:
//! - `HotnessEngine`: per-unit access accounting, tenant decay and threshold adaptation
//! - `TieringScheduler`: per-tier promotion/demotion loops with bounded batches
//! - `SplitAdvisor`: budget-gated splitting of skewed large units
//! - `SimulatedMemory`: in-memory collaborators for tests and the simulator

pub mod accounting;
pub mod adaptation;
pub mod bucket;
pub mod histogram;
pub mod placement;
pub mod record;
pub mod sim;
pub mod split;
pub mod tenant;
pub mod tiering;
pub mod watermark;

pub use accounting::{AccessEvent, AccessKind, AccessOutcome, DecayOutcome, HotnessEngine, TierSnapshot};
pub use adaptation::{AdaptationOutcome, ThresholdAdapter, Thresholds};
pub use bucket::{bucket, skew_bucket, threshold_value};
pub use histogram::{HotnessHistogram, SkewDistribution};
pub use placement::{
    ActionBudget, BatchOutcome, FailureReason, FixedActionBudget, IsolatedUnit, ListKind,
    MigrationExecutor, MigrationFailure, Placement, PlacementList, SplitExecutor, TierOccupancy,
};
pub use record::{AccessRecord, Backing, LargeUnitSummary, TrackedUnit, UnitSize};
pub use sim::SimulatedMemory;
pub use split::{BudgetPool, SplitAdvisor, SplitDecision, SplitDenial, SplitState};
pub use tenant::{TenantAccounting, TenantSpec, TierAccounting};
pub use tiering::{BatchReport, CycleReport, Direction, MigrationQueue, SchedulerBackends, TieringScheduler};
pub use watermark::WatermarkCalculator;
