//! In-memory memory manager for tests and the simulator
//!
//! [`SimulatedMemory`] owns per tenant-tier eligibility lists and implements
//! every collaborator the engine and scheduler drive, with configurable
//! failure patterns.
//!
//! # Features
//!
//! - **Sticky Failures**: a unit fails every migration until cleared
//! - **Random Failures**: configurable per-unit failure rate
//! - **Batch Errors**: queued whole-batch errors, consumed in order
//! - **Latency Simulation**: delay before each batch completes
//!
//! Lists are FIFO: placement requests append at the head, isolation takes
//! from the tail, put-back units rejoin at the head.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tierd_core::{CoreError, CoreResult, TenantId, TierId, UnitAddress, SUBUNITS_PER_LARGE};

use crate::placement::{
    BatchOutcome, FailureReason, IsolatedUnit, ListKind, MigrationExecutor, MigrationFailure,
    PlacementList, SplitExecutor, TierOccupancy,
};
use crate::record::Backing;

#[derive(Debug, Clone, Copy)]
struct SimUnit {
    pages: u64,
    backing: Backing,
    /// `None` while isolated
    list: Option<ListKind>,
}

#[derive(Debug, Default)]
struct SimTier {
    lists: [VecDeque<UnitAddress>; 4],
    list_pages: [u64; 4],
    units: HashMap<UnitAddress, SimUnit>,
    in_flight: u64,
}

impl SimTier {
    fn link(&mut self, address: UnitAddress, list: ListKind) {
        if let Some(unit) = self.units.get_mut(&address) {
            unit.list = Some(list);
            self.lists[list.index()].push_back(address);
            self.list_pages[list.index()] += unit.pages;
        }
    }

    fn unlink(&mut self, address: UnitAddress) {
        let Some(unit) = self.units.get_mut(&address) else {
            return;
        };
        if let Some(list) = unit.list.take() {
            self.lists[list.index()].retain(|queued| *queued != address);
            self.list_pages[list.index()] -= unit.pages;
        }
    }

    fn relink(&mut self, address: UnitAddress, list: ListKind) {
        let current = self.units.get(&address).and_then(|unit| unit.list);
        if current.is_some_and(|current| current != list) {
            self.unlink(address);
            self.link(address, list);
        }
    }

    fn occupied(&self) -> u64 {
        self.units.values().map(|unit| unit.pages).sum()
    }
}

#[derive(Debug, Default)]
struct SimState {
    tenants: HashMap<TenantId, Vec<SimTier>>,
    sticky_failures: HashMap<UnitAddress, FailureReason>,
    batch_errors: VecDeque<String>,
    failure_rate: f64,
    refuse_splits: bool,
}

impl SimState {
    fn tier_mut(&mut self, tenant: TenantId, tier: TierId) -> Option<&mut SimTier> {
        self.tenants.get_mut(&tenant)?.get_mut(tier.index())
    }

    fn tier(&self, tenant: TenantId, tier: TierId) -> Option<&SimTier> {
        self.tenants.get(&tenant)?.get(tier.index())
    }
}

/// Simulated memory manager.
#[derive(Debug, Default)]
pub struct SimulatedMemory {
    state: RwLock<SimState>,
    latency_ms: AtomicU64,
    batches: AtomicUsize,
}

impl SimulatedMemory {
    /// Create an empty simulation without failures or latency
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates empty lists for a tenant spanning `tiers` tiers.
    pub fn register_tenant(&self, tenant: TenantId, tiers: usize) {
        self.state
            .write()
            .tenants
            .insert(tenant, (0..tiers).map(|_| SimTier::default()).collect());
    }

    /// Places a new unit on the inactive list of its backing.
    pub fn add_unit(&self, tenant: TenantId, tier: TierId, address: UnitAddress, pages: u64, backing: Backing) {
        let mut state = self.state.write();
        let Some(sim_tier) = state.tier_mut(tenant, tier) else {
            return;
        };
        sim_tier.units.insert(
            address,
            SimUnit {
                pages,
                backing,
                list: None,
            },
        );
        sim_tier.link(address, ListKind::for_unit(backing, false));
    }

    /// Sets the pages reported as in flight onto a tier.
    pub fn set_in_flight(&self, tenant: TenantId, tier: TierId, pages: u64) {
        if let Some(sim_tier) = self.state.write().tier_mut(tenant, tier) {
            sim_tier.in_flight = pages;
        }
    }

    /// Makes every migration of `address` fail with `reason`.
    pub fn fail_unit(&self, address: UnitAddress, reason: FailureReason) {
        self.state.write().sticky_failures.insert(address, reason);
    }

    /// Clears sticky failures.
    pub fn clear_failures(&self) {
        self.state.write().sticky_failures.clear();
    }

    /// Probability (0.0-1.0) that a single unit migration fails as busy.
    pub fn set_failure_rate(&self, rate: f64) {
        self.state.write().failure_rate = rate.clamp(0.0, 1.0);
    }

    /// Queues a whole-batch error for the next migration call.
    pub fn fail_next_batch(&self, message: impl Into<String>) {
        self.state.write().batch_errors.push_back(message.into());
    }

    /// Refuse (`Ok(false)`) all split requests.
    pub fn set_refuse_splits(&self, refuse: bool) {
        self.state.write().refuse_splits = refuse;
    }

    /// Delay before each migration batch completes.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Migration batches attempted so far.
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::Relaxed)
    }

    /// Tier and list of a unit; `None` if unknown or isolated.
    pub fn list_of(&self, tenant: TenantId, address: UnitAddress) -> Option<(TierId, ListKind)> {
        let state = self.state.read();
        let tiers = state.tenants.get(&tenant)?;
        tiers.iter().enumerate().find_map(|(index, sim_tier)| {
            let unit = sim_tier.units.get(&address)?;
            unit.list.map(|list| (TierId(index as u8), list))
        })
    }

    /// Units on a list, tail first.
    pub fn list_contents(&self, tenant: TenantId, tier: TierId, list: ListKind) -> Vec<UnitAddress> {
        self.state
            .read()
            .tier(tenant, tier)
            .map(|sim_tier| sim_tier.lists[list.index()].iter().copied().collect())
            .unwrap_or_default()
    }

    /// Units resident on a tier, isolated ones included.
    pub fn unit_count(&self, tenant: TenantId, tier: TierId) -> usize {
        self.state
            .read()
            .tier(tenant, tier)
            .map_or(0, |sim_tier| sim_tier.units.len())
    }

    fn relink(&self, tenant: TenantId, tier: TierId, address: UnitAddress, fast_eligible: bool) {
        let mut state = self.state.write();
        let Some(sim_tier) = state.tier_mut(tenant, tier) else {
            return;
        };
        let Some(unit) = sim_tier.units.get(&address) else {
            return;
        };
        let list = ListKind::for_unit(unit.backing, fast_eligible);
        sim_tier.relink(address, list);
    }

    fn apply_batch(
        &self,
        tenant: TenantId,
        units: &[IsolatedUnit],
        from: TierId,
        to: TierId,
    ) -> CoreResult<BatchOutcome> {
        let mut state = self.state.write();
        if let Some(message) = state.batch_errors.pop_front() {
            return Err(CoreError::Migration(message));
        }
        let failure_rate = state.failure_rate;

        let mut outcome = BatchOutcome::default();
        let mut arrived = Vec::new();
        for isolated in units {
            let address = isolated.address;
            let reason = state
                .sticky_failures
                .get(&address)
                .copied()
                .or_else(|| roll_failure(failure_rate).then_some(FailureReason::Busy));
            if let Some(reason) = reason {
                outcome.failed.push(MigrationFailure { address, reason });
                continue;
            }

            let source = state
                .tier_mut(tenant, from)
                .ok_or_else(|| CoreError::not_found("tier", from.to_string()))?;
            match source.units.get(&address) {
                Some(unit) if unit.list.is_none() => {
                    if let Some(unit) = source.units.remove(&address) {
                        arrived.push((address, unit));
                    }
                    outcome.succeeded.push(address);
                }
                _ => outcome.failed.push(MigrationFailure {
                    address,
                    reason: FailureReason::Locked,
                }),
            }
        }

        let promoted = to < from;
        let destination = state
            .tier_mut(tenant, to)
            .ok_or_else(|| CoreError::not_found("tier", to.to_string()))?;
        for (address, unit) in arrived {
            let list = ListKind::for_unit(unit.backing, promoted);
            destination.units.insert(address, SimUnit { list: None, ..unit });
            destination.link(address, list);
        }
        Ok(outcome)
    }
}

fn roll_failure(rate: f64) -> bool {
    use rand::Rng;

    rate > 0.0 && rand::thread_rng().gen::<f64>() < rate
}

impl PlacementList for SimulatedMemory {
    fn move_to_fast_eligible(&self, tenant: TenantId, tier: TierId, address: UnitAddress) {
        self.relink(tenant, tier, address, true);
    }

    fn move_to_cold_eligible(&self, tenant: TenantId, tier: TierId, address: UnitAddress) {
        self.relink(tenant, tier, address, false);
    }

    fn isolate(&self, tenant: TenantId, tier: TierId, list: ListKind, max_pages: u64) -> Vec<IsolatedUnit> {
        let mut state = self.state.write();
        let Some(sim_tier) = state.tier_mut(tenant, tier) else {
            return Vec::new();
        };

        let mut taken = Vec::new();
        let mut pages = 0u64;
        while pages < max_pages {
            let Some(&address) = sim_tier.lists[list.index()].front() else {
                break;
            };
            sim_tier.unlink(address);
            let unit_pages = sim_tier.units.get(&address).map_or(0, |unit| unit.pages);
            pages += unit_pages;
            taken.push(IsolatedUnit {
                address,
                pages: unit_pages,
                list,
            });
        }
        taken
    }

    fn putback(&self, tenant: TenantId, tier: TierId, units: &[IsolatedUnit]) {
        let mut state = self.state.write();
        let Some(sim_tier) = state.tier_mut(tenant, tier) else {
            return;
        };
        for isolated in units {
            let isolated_here = sim_tier
                .units
                .get(&isolated.address)
                .is_some_and(|unit| unit.list.is_none());
            if isolated_here {
                sim_tier.link(isolated.address, isolated.list);
            }
        }
    }

    fn list_pages(&self, tenant: TenantId, tier: TierId, list: ListKind) -> u64 {
        self.state
            .read()
            .tier(tenant, tier)
            .map_or(0, |sim_tier| sim_tier.list_pages[list.index()])
    }

    fn occupancy(&self, tenant: TenantId, tier: TierId) -> TierOccupancy {
        self.state
            .read()
            .tier(tenant, tier)
            .map_or_else(TierOccupancy::default, |sim_tier| TierOccupancy {
                occupied_pages: sim_tier.occupied(),
                in_flight_pages: sim_tier.in_flight,
            })
    }
}

#[async_trait]
impl MigrationExecutor for SimulatedMemory {
    async fn migrate_batch(
        &self,
        tenant: TenantId,
        units: &[IsolatedUnit],
        from: TierId,
        to: TierId,
    ) -> CoreResult<BatchOutcome> {
        self.batches.fetch_add(1, Ordering::Relaxed);

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        self.apply_batch(tenant, units, from, to)
    }
}

#[async_trait]
impl SplitExecutor for SimulatedMemory {
    async fn split(&self, tenant: TenantId, tier: TierId, address: UnitAddress) -> CoreResult<bool> {
        let mut state = self.state.write();
        if state.refuse_splits {
            return Ok(false);
        }
        let sim_tier = state
            .tier_mut(tenant, tier)
            .ok_or_else(|| CoreError::not_found("tier", tier.to_string()))?;
        let unit = *sim_tier
            .units
            .get(&address)
            .ok_or_else(|| CoreError::not_found("unit", address.to_string()))?;

        let Some(list) = unit.list else {
            // isolated: try again later
            return Ok(false);
        };
        if unit.pages != SUBUNITS_PER_LARGE as u64 {
            return Ok(false);
        }

        sim_tier.unlink(address);
        sim_tier.units.remove(&address);
        for index in 0..SUBUNITS_PER_LARGE {
            let sub = address.subunit(index);
            sim_tier.units.insert(
                sub,
                SimUnit {
                    pages: 1,
                    backing: unit.backing,
                    list: None,
                },
            );
            sim_tier.link(sub, list);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim_with_tenant() -> (SimulatedMemory, TenantId) {
        let sim = SimulatedMemory::new();
        let tenant = TenantId::new();
        sim.register_tenant(tenant, 2);
        (sim, tenant)
    }

    #[test]
    fn test_isolate_may_overshoot_by_one_unit() {
        let (sim, tenant) = sim_with_tenant();
        sim.add_unit(tenant, TierId(0), UnitAddress(0x1000), 1, Backing::File);
        sim.add_unit(tenant, TierId(0), UnitAddress(0x20_0000), 512, Backing::File);
        sim.add_unit(tenant, TierId(0), UnitAddress(0x3000), 1, Backing::File);

        let taken = sim.isolate(tenant, TierId(0), ListKind::InactiveFile, 2);

        assert_eq!(taken.len(), 2);
        assert_eq!(taken.iter().map(|u| u.pages).sum::<u64>(), 513);
        assert_eq!(sim.list_pages(tenant, TierId(0), ListKind::InactiveFile), 1);
        // isolated units still occupy the tier
        assert_eq!(sim.occupancy(tenant, TierId(0)).occupied_pages, 514);
        assert_eq!(sim.list_of(tenant, UnitAddress(0x1000)), None);

        sim.putback(tenant, TierId(0), &taken);
        assert_eq!(sim.list_pages(tenant, TierId(0), ListKind::InactiveFile), 514);
    }

    #[test]
    fn test_placement_requests_are_idempotent() {
        let (sim, tenant) = sim_with_tenant();
        let addr = UnitAddress(0x1000);
        sim.add_unit(tenant, TierId(1), addr, 1, Backing::Anon);

        sim.move_to_fast_eligible(tenant, TierId(1), addr);
        sim.move_to_fast_eligible(tenant, TierId(1), addr);

        assert_eq!(sim.list_contents(tenant, TierId(1), ListKind::ActiveAnon), vec![addr]);
        assert_eq!(sim.list_pages(tenant, TierId(1), ListKind::InactiveAnon), 0);

        // isolated units ignore placement requests
        let taken = sim.isolate(tenant, TierId(1), ListKind::ActiveAnon, 1);
        sim.move_to_cold_eligible(tenant, TierId(1), addr);
        assert_eq!(sim.list_of(tenant, addr), None);
        sim.putback(tenant, TierId(1), &taken);
        assert_eq!(sim.list_of(tenant, addr), Some((TierId(1), ListKind::ActiveAnon)));
    }

    #[tokio::test]
    async fn test_migrate_batch_moves_and_fails() {
        let (sim, tenant) = sim_with_tenant();
        sim.add_unit(tenant, TierId(1), UnitAddress(0x1000), 1, Backing::Anon);
        sim.add_unit(tenant, TierId(1), UnitAddress(0x2000), 1, Backing::Anon);
        sim.fail_unit(UnitAddress(0x2000), FailureReason::Writeback);

        let taken = sim.isolate(tenant, TierId(1), ListKind::InactiveAnon, 2);
        let outcome = sim
            .migrate_batch(tenant, &taken, TierId(1), TierId(0))
            .await
            .unwrap();

        assert_eq!(outcome.succeeded, vec![UnitAddress(0x1000)]);
        assert_eq!(outcome.failed[0].reason, FailureReason::Writeback);
        assert_eq!(
            sim.list_of(tenant, UnitAddress(0x1000)),
            Some((TierId(0), ListKind::ActiveAnon))
        );
        // failed units stay isolated on the source tier
        assert_eq!(sim.list_of(tenant, UnitAddress(0x2000)), None);
        assert_eq!(sim.unit_count(tenant, TierId(1)), 1);
        assert_eq!(sim.batches(), 1);
    }

    #[tokio::test]
    async fn test_batch_error_consumed_in_order() {
        let (sim, tenant) = sim_with_tenant();
        sim.fail_next_batch("executor offline");

        let first = sim.migrate_batch(tenant, &[], TierId(0), TierId(1)).await;
        assert!(matches!(first, Err(CoreError::Migration(_))));
        assert!(sim.migrate_batch(tenant, &[], TierId(0), TierId(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_split_replaces_large_unit() {
        let (sim, tenant) = sim_with_tenant();
        let addr = UnitAddress(0x20_0000);
        sim.add_unit(tenant, TierId(0), addr, 512, Backing::Anon);

        assert!(sim.split(tenant, TierId(0), addr).await.unwrap());
        assert_eq!(sim.unit_count(tenant, TierId(0)), 512);
        assert_eq!(sim.list_pages(tenant, TierId(0), ListKind::InactiveAnon), 512);
        assert!(sim.split(tenant, TierId(0), addr).await.is_err());

        sim.set_refuse_splits(true);
        sim.add_unit(tenant, TierId(0), UnitAddress(0x40_0000), 512, Backing::Anon);
        assert!(!sim.split(tenant, TierId(0), UnitAddress(0x40_0000)).await.unwrap());
    }
}
