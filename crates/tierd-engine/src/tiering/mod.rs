//! Tiering Scheduler
//!
//! One long-lived task per memory tier turns the accounting engine's
//! placement decisions into bounded migration batches:
//!
//! ```text
//!            tier 0 loop                  tier 1 loop
//!   ┌──────────────────────────┐  ┌──────────────────────────┐
//!   │ next tenant (round-robin)│  │ next tenant (round-robin)│
//!   │ pending splits           │  │ pending splits           │
//!   │ reclassify if needed     │  │ reclassify if needed     │
//!   │ demote ──────────────────┼─▶│                          │
//!   │                          │◀─┼────────────────── promote│
//!   │ sleep / stop             │  │ sleep / stop             │
//!   └──────────────────────────┘  └──────────────────────────┘
//! ```
//!
//! Demotion drains a tier toward its demotion watermark, cold file-backed
//! units first. Promotion fills the faster tier up to its promotion
//! watermark, bounded by the per-cycle action budget. Units the executor
//! could not move are put back on the list they came from.

mod queue;
mod scheduler;

pub use queue::MigrationQueue;
pub use scheduler::{BatchReport, CycleReport, Direction, SchedulerBackends, TieringScheduler};
