use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tierd_core::metrics::{CYCLE_DURATION, MIGRATED_PAGES};
use tierd_core::{CoreError, CoreResult, SchedulerConfig, TenantId, TierId, TierdConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::MigrationQueue;
use crate::accounting::HotnessEngine;
use crate::placement::{
    ActionBudget, FixedActionBudget, IsolatedUnit, ListKind, MigrationExecutor, PlacementList,
    SplitExecutor,
};
use crate::tenant::TenantAccounting;

/// Collaborators the scheduler drives.
#[derive(Clone)]
pub struct SchedulerBackends {
    /// Eligibility lists and occupancy
    pub placement: Arc<dyn PlacementList>,
    /// Moves isolated units between tiers
    pub migrator: Arc<dyn MigrationExecutor>,
    /// Breaks large units up
    pub splitter: Arc<dyn SplitExecutor>,
}

/// Migration direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Toward the faster neighbour
    Promote,
    /// Toward the slower neighbour
    Demote,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Promote => "promote",
            Direction::Demote => "demote",
        }
    }
}

/// Page counts of one migration batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Promotion or demotion
    pub direction: Direction,
    /// Destination tier
    pub target: TierId,
    /// Pages handed to the migration executor
    pub isolated: u64,
    /// Pages now on the destination tier
    pub migrated: u64,
    /// Pages the executor could not move (put back)
    pub failed: u64,
    /// Pages isolated but put back unmigrated (warm, or too large for the
    /// promotion budget)
    pub kept: u64,
}

impl BatchReport {
    fn empty(direction: Direction, target: TierId) -> Self {
        Self {
            direction,
            target,
            isolated: 0,
            migrated: 0,
            failed: 0,
            kept: 0,
        }
    }
}

/// Result of one tier-loop cycle for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Tenant served by the cycle
    pub tenant: TenantId,
    /// Tier whose loop ran the cycle
    pub tier: TierId,
    /// Large units split before evaluation
    pub splits_applied: usize,
    /// Split requests the executor refused
    pub splits_refused: usize,
    /// Placement requests re-issued after a threshold change
    pub reclassified: usize,
    /// Batch moved to the slower neighbour, if there is one
    pub demotion: Option<BatchReport>,
    /// Batch moved to the faster neighbour, if there is one
    pub promotion: Option<BatchReport>,
}

/// Per-tier promotion/demotion loops.
///
/// Every tier has a round-robin queue of tenants. A cycle of tier `t` serves
/// one tenant: pending splits, reclassification after a threshold change,
/// demotion to `t + 1` and promotion to `t - 1`, each bounded by
/// `max_pages_per_cycle`.
pub struct TieringScheduler {
    engine: Arc<HotnessEngine>,
    backends: SchedulerBackends,
    budget: Arc<dyn ActionBudget>,
    config: SchedulerConfig,
    warm_enabled: bool,
    queues: Arc<Vec<Mutex<MigrationQueue>>>,
    stop: Arc<watch::Sender<bool>>,
    workers: Vec<JoinHandle<()>>,
}

impl TieringScheduler {
    /// Create a scheduler for `tier_count` tiers.
    ///
    /// The promotion budget defaults to `scheduler.action_budget_pages`.
    pub fn new(
        config: &TierdConfig,
        tier_count: usize,
        engine: Arc<HotnessEngine>,
        backends: SchedulerBackends,
    ) -> Self {
        let queues = (0..tier_count)
            .map(|_| Mutex::new(MigrationQueue::new()))
            .collect();
        let (stop, _) = watch::channel(false);

        Self {
            engine,
            backends,
            budget: Arc::new(FixedActionBudget(config.scheduler.action_budget_pages)),
            config: config.scheduler.clone(),
            warm_enabled: config.adaptation.warm_enabled,
            queues: Arc::new(queues),
            stop: Arc::new(stop),
            workers: Vec::new(),
        }
    }

    /// Replace the promotion budget source
    #[must_use]
    pub fn with_action_budget(mut self, budget: Arc<dyn ActionBudget>) -> Self {
        self.budget = budget;
        self
    }

    /// Number of tier loops.
    #[must_use]
    pub fn tier_count(&self) -> usize {
        self.queues.len()
    }

    /// Queues a tenant on every tier it spans.
    ///
    /// # Errors
    ///
    /// - `CoreError::NotFound` if the engine does not know the tenant
    /// - `CoreError::ValidationError` if the tenant spans more tiers than the
    ///   scheduler runs
    pub fn register_tenant(&self, tenant_id: TenantId) -> CoreResult<()> {
        let tenant = self.engine.tenant(tenant_id)?;
        if tenant.tier_count() > self.queues.len() {
            return Err(CoreError::ValidationError(format!(
                "tenant `{}` spans {} tiers, scheduler runs {}",
                tenant.name(),
                tenant.tier_count(),
                self.queues.len()
            )));
        }

        for queue in self.queues.iter().take(tenant.tier_count()) {
            queue.lock().register(tenant_id);
        }
        tracing::debug!(tenant_id = %tenant_id, tiers = tenant.tier_count(), "Tenant queued for tiering");
        Ok(())
    }

    /// Removes a tenant from every tier queue.
    pub fn unregister_tenant(&self, tenant_id: TenantId) {
        for queue in self.queues.iter() {
            queue.lock().unregister(tenant_id);
        }
    }

    /// Tenants queued on `tier`.
    #[must_use]
    pub fn queued_tenants(&self, tier: TierId) -> usize {
        self.queues.get(tier.index()).map_or(0, |queue| queue.lock().len())
    }

    /// Start one background loop per tier
    ///
    /// Each loop runs a cycle, then sleeps `cycle_interval_ms` (or
    /// `idle_interval_ms` when no tenant is queued) until stopped.
    pub fn start_workers(&mut self) {
        if !self.workers.is_empty() {
            tracing::warn!("Tier loops already running");
            return;
        }

        for index in 0..self.queues.len() {
            let scheduler = self.clone_for_worker();
            let stop_rx = self.stop.subscribe();
            let tier = TierId(index as u8);
            self.workers
                .push(tokio::spawn(async move { scheduler.tier_loop(tier, stop_rx).await }));
        }

        tracing::info!(
            tiers = self.queues.len(),
            interval_ms = self.config.cycle_interval_ms,
            "Tier loops started"
        );
    }

    async fn tier_loop(self, tier: TierId, mut stop_rx: watch::Receiver<bool>) {
        loop {
            if *stop_rx.borrow() {
                break;
            }

            let pause = match self.run_tier_cycle(tier).await {
                Ok(Some(report)) => {
                    tracing::debug!(
                        %tier,
                        tenant_id = %report.tenant,
                        demoted = report.demotion.map_or(0, |b| b.migrated),
                        promoted = report.promotion.map_or(0, |b| b.migrated),
                        "Tiering cycle complete"
                    );
                    self.config.cycle_interval()
                }
                Ok(None) => self.config.idle_interval(),
                Err(e) => {
                    tracing::error!(%tier, error = %e, "Tiering cycle failed");
                    self.config.cycle_interval()
                }
            };

            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!(%tier, "Tier loop stopped");
    }

    /// Stops all tier loops and waits for running cycles to finish.
    ///
    /// Stopping is terminal; loops started afterwards exit immediately.
    pub async fn shutdown(&mut self) -> CoreResult<()> {
        self.stop.send_replace(true);

        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Tier loop ended abnormally");
            }
        }
        tracing::info!("Tiering scheduler shut down");
        Ok(())
    }

    /// Clone for worker (without JoinHandles)
    fn clone_for_worker(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            backends: self.backends.clone(),
            budget: Arc::clone(&self.budget),
            config: self.config.clone(),
            warm_enabled: self.warm_enabled,
            queues: Arc::clone(&self.queues),
            stop: Arc::clone(&self.stop),
            workers: Vec::new(),
        }
    }

    // ========== Cycle ==========

    /// Run one cycle of `tier` for the next queued tenant
    ///
    /// Returns `None` when no tenant is queued on the tier. This is what the
    /// background loop calls; tests drive it directly.
    ///
    /// # Errors
    ///
    /// Returns an error if the tier does not exist or a collaborator failed
    /// a whole batch. Isolated units are put back before returning.
    pub async fn run_tier_cycle(&self, tier: TierId) -> CoreResult<Option<CycleReport>> {
        let Some(tenant) = self.next_tenant(tier)? else {
            return Ok(None);
        };
        let tenant_id = tenant.id();
        let start = Instant::now();

        let (splits_applied, splits_refused) = self.run_splits(tenant_id, tier).await?;

        let reclassified = if self.engine.needs_adjusting(tenant_id, tier)? {
            self.engine
                .reclassify(tenant_id, tier, self.config.reclassify_limit)?
        } else {
            0
        };

        let demotion = match tier.slower(tenant.tier_count()) {
            Some(to) => Some(self.demote(&tenant, tier, to).await?),
            None => None,
        };
        let promotion = match tier.faster() {
            Some(to) => Some(self.promote(&tenant, tier, to).await?),
            None => None,
        };

        CYCLE_DURATION
            .with_label_values(&[&tier.to_string()])
            .observe(start.elapsed().as_secs_f64());

        Ok(Some(CycleReport {
            tenant: tenant_id,
            tier,
            splits_applied,
            splits_refused,
            reclassified,
            demotion,
            promotion,
        }))
    }

    /// Pops tenants until one may be tiered; disabled or vanished tenants
    /// are dropped from the queue.
    fn next_tenant(&self, tier: TierId) -> CoreResult<Option<Arc<TenantAccounting>>> {
        let queue = self
            .queues
            .get(tier.index())
            .ok_or_else(|| CoreError::not_found("tier", tier.to_string()))?;

        let attempts = queue.lock().len();
        for _ in 0..attempts {
            let Some(tenant_id) = queue.lock().next() else {
                return Ok(None);
            };
            match self.engine.tenant(tenant_id) {
                Ok(tenant) if tenant.is_tiering_enabled() => return Ok(Some(tenant)),
                _ => {
                    queue.lock().unregister(tenant_id);
                    tracing::debug!(%tier, tenant_id = %tenant_id, "Dropped tenant from tier queue");
                }
            }
        }
        Ok(None)
    }

    async fn run_splits(&self, tenant_id: TenantId, tier: TierId) -> CoreResult<(usize, usize)> {
        let mut applied = 0;
        let mut refused = 0;

        for address in self.engine.take_split_requests(tenant_id, tier)? {
            match self.backends.splitter.split(tenant_id, tier, address).await {
                Ok(true) => match self.engine.apply_split(tenant_id, address) {
                    Ok(_) => applied += 1,
                    Err(e) => {
                        tracing::warn!(tenant_id = %tenant_id, %address, error = %e, "Split not recorded");
                    }
                },
                Ok(false) => {
                    self.engine.cancel_split(tenant_id, tier, address)?;
                    refused += 1;
                }
                Err(e) => {
                    tracing::warn!(tenant_id = %tenant_id, %address, error = %e, "Split executor failed");
                    self.engine.cancel_split(tenant_id, tier, address)?;
                    refused += 1;
                }
            }
        }
        Ok((applied, refused))
    }

    async fn demote(&self, tenant: &TenantAccounting, from: TierId, to: TierId) -> CoreResult<BatchReport> {
        let tenant_id = tenant.id();
        let placement = &self.backends.placement;

        let capacity = tenant.capacity(from)?;
        let occupancy = placement.occupancy(tenant_id, from);
        let target = capacity.saturating_sub(self.engine.watermarks().demotion_watermark(capacity));
        let mut excess = occupancy.occupied_pages.saturating_sub(target);

        // Never target more than the tenant has here
        let tracked = self.engine.tracked_pages(tenant_id, from)?;
        if tracked < excess {
            excess = tracked.saturating_sub(self.config.demotion_safety_margin_pages);
        }
        let excess = excess.min(self.config.max_pages_per_cycle);
        if excess == 0 {
            return Ok(BatchReport::empty(Direction::Demote, to));
        }

        let warm = self.engine.thresholds(tenant_id, from)?.warm;
        let others: u64 = ListKind::ALL[..3]
            .iter()
            .map(|&list| placement.list_pages(tenant_id, from, list))
            .sum();
        let lists = if excess > others {
            &ListKind::ALL[..]
        } else {
            &ListKind::ALL[..3]
        };

        // Chunks never exceed min_free_pages candidates
        let chunk_pages = self.config.scan_chunk.min(self.config.min_free_pages).max(1);

        let mut selected = Vec::new();
        let mut kept = Vec::new();
        let mut selected_pages = 0u64;

        for &list in lists {
            let mut scanned = 0u64;
            while selected_pages < excess && scanned < excess {
                let want = chunk_pages
                    .min(excess - selected_pages)
                    .min(excess - scanned);
                let chunk = placement.isolate(tenant_id, from, list, want);
                if chunk.is_empty() {
                    break;
                }
                scanned += chunk.iter().map(|unit| unit.pages).sum::<u64>();

                if list.is_file() || !self.warm_enabled {
                    selected_pages += chunk.iter().map(|unit| unit.pages).sum::<u64>();
                    selected.extend(chunk);
                    continue;
                }

                let addresses: Vec<_> = chunk.iter().map(|unit| unit.address).collect();
                let bins = match self.engine.unit_hotness(tenant_id, from, &addresses) {
                    Ok(bins) => bins,
                    Err(e) => {
                        placement.putback(tenant_id, from, &chunk);
                        placement.putback(tenant_id, from, &selected);
                        placement.putback(tenant_id, from, &kept);
                        return Err(e);
                    }
                };
                for (unit, bin) in chunk.into_iter().zip(bins) {
                    if bin.is_some_and(|bin| bin >= warm) {
                        kept.push(unit);
                    } else {
                        selected_pages += unit.pages;
                        selected.push(unit);
                    }
                }
            }

            if selected_pages >= excess {
                break;
            }
        }

        self.migrate(tenant_id, Direction::Demote, from, to, selected, kept)
            .await
    }

    async fn promote(&self, tenant: &TenantAccounting, from: TierId, to: TierId) -> CoreResult<BatchReport> {
        let tenant_id = tenant.id();
        let placement = &self.backends.placement;

        let capacity = tenant.capacity(to)?;
        let occupancy = placement.occupancy(tenant_id, to);
        let available = capacity
            .saturating_sub(self.engine.watermarks().promotion_watermark(capacity))
            .saturating_sub(occupancy.occupied_pages)
            .saturating_sub(occupancy.in_flight_pages);
        let budget = available
            .min(self.budget.promotion_budget(tenant_id, from))
            .min(self.config.max_pages_per_cycle);
        if budget == 0 {
            return Ok(BatchReport::empty(Direction::Promote, to));
        }

        let mut selected: Vec<IsolatedUnit> = Vec::new();
        let mut oversized: Vec<IsolatedUnit> = Vec::new();
        let mut selected_pages = 0u64;
        for list in [ListKind::ActiveAnon, ListKind::ActiveFile] {
            while selected_pages < budget {
                let want = self.config.scan_chunk.min(budget - selected_pages);
                let chunk = placement.isolate(tenant_id, from, list, want);
                if chunk.is_empty() {
                    break;
                }
                // Units that would overrun the budget stay isolated until the
                // batch is done so the scan cannot meet them again.
                for unit in chunk {
                    if unit.pages <= budget - selected_pages {
                        selected_pages += unit.pages;
                        selected.push(unit);
                    } else {
                        oversized.push(unit);
                    }
                }
            }
        }

        self.migrate(tenant_id, Direction::Promote, from, to, selected, oversized)
            .await
    }

    /// Hands `selected` to the executor, records successes with the engine
    /// and puts everything else back.
    async fn migrate(
        &self,
        tenant_id: TenantId,
        direction: Direction,
        from: TierId,
        to: TierId,
        selected: Vec<IsolatedUnit>,
        kept: Vec<IsolatedUnit>,
    ) -> CoreResult<BatchReport> {
        let placement = &self.backends.placement;
        let mut report = BatchReport::empty(direction, to);
        report.isolated = selected.iter().map(|unit| unit.pages).sum();
        report.kept = kept.iter().map(|unit| unit.pages).sum();

        if selected.is_empty() {
            placement.putback(tenant_id, from, &kept);
            return Ok(report);
        }

        let outcome = match self
            .backends
            .migrator
            .migrate_batch(tenant_id, &selected, from, to)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                placement.putback(tenant_id, from, &selected);
                placement.putback(tenant_id, from, &kept);
                MIGRATED_PAGES
                    .with_label_values(&[direction.label(), "error"])
                    .inc_by(report.isolated);
                return Err(e);
            }
        };

        let (moved, mut returned): (Vec<_>, Vec<_>) = selected
            .into_iter()
            .partition(|unit| outcome.contains(unit.address));

        for unit in &moved {
            report.migrated += unit.pages;
            if let Err(e) = self.engine.apply_migration(tenant_id, unit.address, from, to) {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    address = %unit.address,
                    error = %e,
                    "Migrated unit no longer tracked"
                );
            }
        }
        report.failed = returned.iter().map(|unit| unit.pages).sum();

        returned.extend(kept);
        placement.putback(tenant_id, from, &returned);

        MIGRATED_PAGES
            .with_label_values(&[direction.label(), "migrated"])
            .inc_by(report.migrated);
        MIGRATED_PAGES
            .with_label_values(&[direction.label(), "failed"])
            .inc_by(report.failed);

        if report.failed > 0 {
            tracing::debug!(
                tenant_id = %tenant_id,
                from = %from,
                to = %to,
                failures = outcome.failed.len(),
                "Migration failures returned to source lists"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Backing, UnitSize};
    use crate::sim::SimulatedMemory;
    use crate::tenant::TenantSpec;
    use tierd_core::UnitAddress;

    fn setup(capacities: Vec<u64>) -> (TieringScheduler, Arc<HotnessEngine>, Arc<SimulatedMemory>, TenantId) {
        let config = TierdConfig::default();
        let sim = Arc::new(SimulatedMemory::new());
        let engine = Arc::new(HotnessEngine::new(&config, sim.clone()));
        let tenant = engine
            .register_tenant(TenantSpec::new("t", capacities.clone()))
            .unwrap();
        sim.register_tenant(tenant.id(), capacities.len());

        let scheduler = TieringScheduler::new(
            &config,
            capacities.len(),
            Arc::clone(&engine),
            SchedulerBackends {
                placement: sim.clone(),
                migrator: sim.clone(),
                splitter: sim.clone(),
            },
        );
        scheduler.register_tenant(tenant.id()).unwrap();
        (scheduler, engine, sim, tenant.id())
    }

    fn attach(engine: &HotnessEngine, sim: &SimulatedMemory, id: TenantId, tier: u8, addr: u64, backing: Backing) {
        sim.add_unit(id, TierId(tier), UnitAddress(addr), 1, backing);
        engine
            .attach_unit(id, TierId(tier), UnitAddress(addr), UnitSize::Base, backing)
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_queue_is_idle() {
        let config = TierdConfig::default();
        let sim = Arc::new(SimulatedMemory::new());
        let engine = Arc::new(HotnessEngine::new(&config, sim.clone()));
        let scheduler = TieringScheduler::new(
            &config,
            2,
            engine,
            SchedulerBackends {
                placement: sim.clone(),
                migrator: sim.clone(),
                splitter: sim,
            },
        );

        assert_eq!(scheduler.run_tier_cycle(TierId(1)).await.unwrap(), None);
        assert!(scheduler.run_tier_cycle(TierId(5)).await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_tenant_is_dropped() {
        let (scheduler, engine, _, id) = setup(vec![100_000, 100_000]);
        assert_eq!(scheduler.queued_tenants(TierId(0)), 1);

        engine.set_tiering_enabled(id, false).unwrap();

        assert_eq!(scheduler.run_tier_cycle(TierId(0)).await.unwrap(), None);
        assert_eq!(scheduler.queued_tenants(TierId(0)), 0);
        assert_eq!(scheduler.queued_tenants(TierId(1)), 1);
    }

    #[tokio::test]
    async fn test_promotion_respects_watermark() {
        // 30_000 pages less the 25_600 reserve leaves room for 4_400
        let (scheduler, engine, sim, id) = setup(vec![30_000, 100_000]);
        attach(&engine, &sim, id, 1, 0x1000, Backing::Anon);
        sim.set_in_flight(id, TierId(0), 4_400);

        engine.on_access(&crate::accounting::AccessEvent {
            tenant: id,
            address: UnitAddress(0x1000),
            kind: crate::accounting::AccessKind::Store,
        });

        let report = scheduler.run_tier_cycle(TierId(1)).await.unwrap().unwrap();
        let promotion = report.promotion.unwrap();
        assert_eq!(promotion.isolated, 0);
        assert_eq!(report.demotion, None);
        assert_eq!(
            sim.list_of(id, UnitAddress(0x1000)),
            Some((TierId(1), ListKind::ActiveAnon))
        );
    }

    #[tokio::test]
    async fn test_warm_anon_units_are_kept() {
        // capacity 12_900 with a 12_800 floor: demotion target is 100 pages
        let (scheduler, engine, sim, id) = setup(vec![12_900, 100_000]);
        for i in 0..150u64 {
            attach(&engine, &sim, id, 0, (i + 1) << 12, Backing::Anon);
        }

        let report = scheduler.run_tier_cycle(TierId(0)).await.unwrap().unwrap();
        let demotion = report.demotion.unwrap();

        // every unit sits at the seeded hot cutoff, which is also the warm cutoff
        assert_eq!(demotion.migrated, 0);
        assert_eq!(demotion.kept, 50);
        assert_eq!(sim.list_pages(id, TierId(0), ListKind::InactiveAnon), 150);
    }
}
