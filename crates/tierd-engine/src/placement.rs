//! Collaborator interfaces the engine and scheduler drive.
//!
//! The engine never owns the placement lists or the migration mechanics. It
//! issues placement requests and hands isolated batches to executors through
//! the traits below:
//! - [`PlacementList`] - per tenant-tier eligibility lists and occupancy
//! - [`MigrationExecutor`] - moves isolated units between tiers
//! - [`SplitExecutor`] - breaks a large unit into base units
//! - [`ActionBudget`] - per-cycle promotion budget

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tierd_core::{CoreResult, TenantId, TierId, UnitAddress};

use crate::record::Backing;

/// Eligibility list a unit lives on within one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    /// Cold file-backed units
    InactiveFile,
    /// Hot file-backed units
    ActiveFile,
    /// Cold anonymous units
    InactiveAnon,
    /// Hot anonymous units
    ActiveAnon,
}

impl ListKind {
    /// All lists, cold file-backed first.
    pub const ALL: [ListKind; 4] = [
        ListKind::InactiveFile,
        ListKind::ActiveFile,
        ListKind::InactiveAnon,
        ListKind::ActiveAnon,
    ];

    /// List a unit of `backing` belongs on given its eligibility.
    #[must_use]
    pub fn for_unit(backing: Backing, fast_eligible: bool) -> Self {
        match (backing, fast_eligible) {
            (Backing::File, false) => ListKind::InactiveFile,
            (Backing::File, true) => ListKind::ActiveFile,
            (Backing::Anon, false) => ListKind::InactiveAnon,
            (Backing::Anon, true) => ListKind::ActiveAnon,
        }
    }

    /// Position in [`ListKind::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Returns `true` for file-backed lists.
    #[must_use]
    pub const fn is_file(self) -> bool {
        matches!(self, ListKind::InactiveFile | ListKind::ActiveFile)
    }
}

/// Placement request issued after an access is accounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Unit reached the hot cutoff
    FastEligible,
    /// Unit fell below the hot cutoff
    ColdEligible,
}

/// A unit taken off its list for migration or inspection.
///
/// Until it is migrated or put back, an isolated unit is on no list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolatedUnit {
    /// Unit address
    pub address: UnitAddress,
    /// Base pages the unit spans
    pub pages: u64,
    /// List the unit was isolated from
    pub list: ListKind,
}

/// Page usage of one tenant on one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierOccupancy {
    /// Pages resident on the tier
    pub occupied_pages: u64,
    /// Pages currently being migrated onto the tier
    pub in_flight_pages: u64,
}

/// Eligibility lists owned by the memory manager.
///
/// Placement requests are idempotent: asking for the list a unit is already
/// on, or for a unit that is isolated, is a no-op.
pub trait PlacementList: Send + Sync {
    /// Requests the unit be placed on its tier's fast-eligible list.
    fn move_to_fast_eligible(&self, tenant: TenantId, tier: TierId, address: UnitAddress);

    /// Requests the unit be placed on its tier's cold-eligible list.
    fn move_to_cold_eligible(&self, tenant: TenantId, tier: TierId, address: UnitAddress);

    /// Takes units off the tail of `list`.
    ///
    /// Units are taken until at least `max_pages` pages are isolated or the
    /// list is empty, so the last unit may overshoot the bound.
    fn isolate(
        &self,
        tenant: TenantId,
        tier: TierId,
        list: ListKind,
        max_pages: u64,
    ) -> Vec<IsolatedUnit>;

    /// Returns isolated units to the lists they were taken from.
    fn putback(&self, tenant: TenantId, tier: TierId, units: &[IsolatedUnit]);

    /// Pages currently on `list`.
    fn list_pages(&self, tenant: TenantId, tier: TierId, list: ListKind) -> u64;

    /// Page usage of the tenant on the tier.
    fn occupancy(&self, tenant: TenantId, tier: TierId) -> TierOccupancy;
}

/// Why a single unit could not be migrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Unit is pinned or referenced
    Busy,
    /// Unit is under writeback
    Writeback,
    /// Unit is locked
    Locked,
    /// Destination tier has no room
    NoSpace,
}

/// Per-unit migration failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MigrationFailure {
    /// Unit that stayed on the source tier
    pub address: UnitAddress,
    /// Failure cause
    pub reason: FailureReason,
}

/// Result of one migration batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    /// Units now resident on the destination tier
    pub succeeded: Vec<UnitAddress>,
    /// Units left isolated on the source tier
    pub failed: Vec<MigrationFailure>,
}

impl BatchOutcome {
    /// Returns `true` if `address` was migrated.
    #[must_use]
    pub fn contains(&self, address: UnitAddress) -> bool {
        self.succeeded.contains(&address)
    }
}

/// Physical migration of isolated units between tiers.
///
/// Units absent from [`BatchOutcome::succeeded`] must be left exactly as they
/// were isolated; the caller puts them back.
#[async_trait]
pub trait MigrationExecutor: Send + Sync {
    /// Migrates a batch from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns an error only when the whole batch could not be attempted.
    /// Per-unit failures are reported in the outcome.
    async fn migrate_batch(
        &self,
        tenant: TenantId,
        units: &[IsolatedUnit],
        from: TierId,
        to: TierId,
    ) -> CoreResult<BatchOutcome>;
}

/// Breaks large units into base units.
#[async_trait]
pub trait SplitExecutor: Send + Sync {
    /// Splits the large unit at `address` on `tier`.
    ///
    /// Returns `Ok(false)` when the unit could not be split right now; it is
    /// then left on its list unmodified.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the unit is unknown to the executor.
    async fn split(&self, tenant: TenantId, tier: TierId, address: UnitAddress) -> CoreResult<bool>;
}

/// Source of the per-cycle promotion budget.
pub trait ActionBudget: Send + Sync {
    /// Pages the scheduler may promote for `tenant` into the tier above `tier`.
    fn promotion_budget(&self, tenant: TenantId, tier: TierId) -> u64;
}

/// Constant promotion budget.
#[derive(Debug, Clone, Copy)]
pub struct FixedActionBudget(pub u64);

impl Default for FixedActionBudget {
    fn default() -> Self {
        Self(8)
    }
}

impl ActionBudget for FixedActionBudget {
    fn promotion_budget(&self, _tenant: TenantId, _tier: TierId) -> u64 {
        self.0
    }
}
