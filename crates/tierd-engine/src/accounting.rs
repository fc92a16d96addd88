//! Hotness Accounting Engine
//!
//! Turns access samples into per-unit counters and histogram updates, runs
//! tenant decay events and threshold adaptation on sample-count triggers, and
//! exposes the operations the tiering scheduler drives (reclassification,
//! migration and split bookkeeping).
//!
//! Locking: the tenant map is an `RwLock`; each tenant-tier has its own mutex.
//! A decay event locks all tiers of a tenant in tier order. Every other path
//! holds at most one tier lock at a time, and no lock is held while calling
//! the placement collaborator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tierd_core::metrics::{ADAPTATIONS, DECAY_EVENTS, HOT_THRESHOLD, SAMPLES_PROCESSED};
use tierd_core::{
    AccountingConfig, CoreError, CoreResult, TenantId, TierId, TierdConfig, UnitAddress,
    SUBUNITS_PER_LARGE,
};

use crate::adaptation::{AdaptationInput, AdaptationOutcome, ThresholdAdapter, Thresholds};
use crate::histogram::{HotnessHistogram, SkewDistribution};
use crate::placement::{Placement, PlacementList};
use crate::record::{Backing, UnitSize};
use crate::split::{SplitAdvisor, SplitState};
use crate::tenant::{TenantAccounting, TenantSpec, TierAccounting};
use crate::watermark::WatermarkCalculator;

/// Sampled access type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    /// Last-level cache miss load
    LlcMiss,
    /// Store
    Store,
}

impl AccessKind {
    /// Metrics label
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            AccessKind::LlcMiss => "llc_miss",
            AccessKind::Store => "store",
        }
    }
}

/// One access sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEvent {
    /// Tenant owning the accessed memory
    pub tenant: TenantId,
    /// Accessed address (any byte inside the unit)
    pub address: UnitAddress,
    /// Access type
    pub kind: AccessKind,
}

/// What happened to one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOutcome {
    /// Sample was accounted to a tracked unit
    Tracked {
        /// Tier holding the unit
        tier: TierId,
        /// Unit bucket after the access
        bin: u8,
        /// Placement request issued for the unit
        placement: Option<Placement>,
    },
    /// Tenant or address is not tracked; the sample was dropped
    Untracked,
}

/// Result of a tenant decay event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DecayOutcome {
    /// Generation after the event
    pub generation: u64,
    /// Histograms were wiped (false when the reset was deferred)
    pub reset: bool,
    /// Smoothed per-mille share of samples on the fast tier
    pub fast_estimate: u64,
}

/// Point-in-time view of one tenant-tier.
#[derive(Debug, Clone, Serialize)]
pub struct TierSnapshot {
    /// Tenant identifier
    pub tenant_id: TenantId,
    /// Tenant name
    pub tenant_name: String,
    /// When the tenant was registered
    pub registered_at: DateTime<Utc>,
    /// Tier
    pub tier: TierId,
    /// Tier capacity in pages
    pub capacity_pages: u64,
    /// Pages of tracked units on the tier
    pub tracked_pages: u64,
    /// Tracked units on the tier
    pub units: usize,
    /// Large units waiting for the split executor
    pub pending_splits: usize,
    /// Histograms, cutoffs and counters
    pub accounting: TierAccounting,
}

/// Access accounting for all tenants.
pub struct HotnessEngine {
    accounting: AccountingConfig,
    adaptation_period_samples: u64,
    initial_split_threshold: u8,
    watermarks: WatermarkCalculator,
    adapter: ThresholdAdapter,
    advisor: SplitAdvisor,
    placement: Arc<dyn PlacementList>,
    tenants: RwLock<HashMap<TenantId, Arc<TenantAccounting>>>,
}

impl HotnessEngine {
    /// Creates an engine issuing placement requests to `placement`.
    pub fn new(config: &TierdConfig, placement: Arc<dyn PlacementList>) -> Self {
        let watermarks = WatermarkCalculator::new(config.watermark.clone());
        Self {
            accounting: config.accounting.clone(),
            adaptation_period_samples: config.adaptation.adaptation_period_samples,
            initial_split_threshold: config.split.initial_threshold,
            adapter: ThresholdAdapter::new(
                &config.accounting,
                &config.adaptation,
                &config.split,
                watermarks.clone(),
            ),
            advisor: SplitAdvisor::new(&config.split),
            watermarks,
            placement,
            tenants: RwLock::new(HashMap::new()),
        }
    }

    /// Watermark calculator shared with the scheduler.
    #[must_use]
    pub fn watermarks(&self) -> &WatermarkCalculator {
        &self.watermarks
    }

    // ========== Tenants ==========

    /// Starts accounting for a tenant.
    ///
    /// # Errors
    ///
    /// - `CoreError::ValidationError` if the tier list is empty or too long
    /// - `CoreError::AlreadyExists` if the tenant is registered
    pub fn register_tenant(&self, spec: TenantSpec) -> CoreResult<Arc<TenantAccounting>> {
        if spec.tier_capacities.is_empty() || spec.tier_capacities.len() > usize::from(u8::MAX) {
            return Err(CoreError::ValidationError(format!(
                "tenant `{}` must span 1..=255 tiers",
                spec.name
            )));
        }

        let mut tenants = self.tenants.write();
        if tenants.contains_key(&spec.id) {
            return Err(CoreError::already_exists("tenant", spec.id.to_string()));
        }

        let thresholds = Thresholds::uniform(self.accounting.min_hot_threshold);
        let split = SplitState::new(self.initial_split_threshold);
        let tenant = Arc::new(TenantAccounting::new(spec, thresholds, split));
        tenants.insert(tenant.id(), Arc::clone(&tenant));

        tracing::info!(
            tenant_id = %tenant.id(),
            name = tenant.name(),
            tiers = tenant.tier_count(),
            "Registered tenant"
        );
        Ok(tenant)
    }

    /// Stops accounting for a tenant and drops all of its records.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the tenant is not registered.
    pub fn unregister_tenant(&self, id: TenantId) -> CoreResult<()> {
        let removed = self.tenants.write().remove(&id);
        match removed {
            Some(tenant) => {
                tenant.set_tiering_enabled(false);
                tracing::info!(tenant_id = %id, "Unregistered tenant");
                Ok(())
            }
            None => Err(CoreError::not_found("tenant", id.to_string())),
        }
    }

    /// Looks up a tenant.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the tenant is not registered.
    pub fn tenant(&self, id: TenantId) -> CoreResult<Arc<TenantAccounting>> {
        self.tenants
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("tenant", id.to_string()))
    }

    /// Registered tenant identifiers.
    #[must_use]
    pub fn tenant_ids(&self) -> Vec<TenantId> {
        self.tenants.read().keys().copied().collect()
    }

    /// Allows or forbids the scheduler to move a tenant's memory.
    ///
    /// A disabled tenant is dropped from the scheduler queues on their next
    /// visit; accounting continues.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the tenant is not registered.
    pub fn set_tiering_enabled(&self, id: TenantId, enabled: bool) -> CoreResult<()> {
        let tenant = self.tenant(id)?;
        tenant.set_tiering_enabled(enabled);
        tracing::info!(tenant_id = %id, enabled, "Tiering toggled");
        Ok(())
    }

    // ========== Units ==========

    /// Starts tracking a unit on `tier`.
    ///
    /// The record is seeded at the current hot cutoff so a fresh unit is
    /// borderline hot. Base unit addresses are aligned down.
    ///
    /// # Errors
    ///
    /// - `CoreError::NotFound` if the tenant or tier does not exist
    /// - `CoreError::ValidationError` if a large unit address is misaligned
    /// - `CoreError::AlreadyExists` if the range overlaps a tracked unit
    pub fn attach_unit(
        &self,
        tenant_id: TenantId,
        tier: TierId,
        address: UnitAddress,
        size: UnitSize,
        backing: Backing,
    ) -> CoreResult<()> {
        let tenant = self.tenant(tenant_id)?;
        let state = tenant.tier(tier)?;

        let (address, pages) = match size {
            UnitSize::Base => (address.base_aligned(), 1),
            UnitSize::Large => {
                if address != address.large_aligned() {
                    return Err(CoreError::ValidationError(format!(
                        "large unit address {address} is not aligned"
                    )));
                }
                (address, SUBUNITS_PER_LARGE as u64)
            }
        };

        tenant.reserve(address, tier, size)?;
        state.lock().attach(address, size, backing);
        tenant.counters.tracked_pages.fetch_add(pages, Ordering::Relaxed);

        tracing::trace!(tenant_id = %tenant_id, %tier, %address, ?size, "Attached unit");
        Ok(())
    }

    /// Stops tracking the unit starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the tenant or unit is not tracked.
    pub fn detach_unit(&self, tenant_id: TenantId, address: UnitAddress) -> CoreResult<()> {
        let tenant = self.tenant(tenant_id)?;
        let location = tenant
            .locate(address)
            .filter(|location| location.address == address)
            .ok_or_else(|| CoreError::not_found("unit", address.to_string()))?;

        let unit = tenant
            .tier(location.tier)?
            .lock()
            .remove(address)
            .ok_or_else(|| CoreError::not_found("unit", address.to_string()))?;
        tenant.index_remove(address);
        tenant
            .counters
            .tracked_pages
            .fetch_sub(unit.pages(), Ordering::Relaxed);

        tracing::trace!(tenant_id = %tenant_id, %address, "Detached unit");
        Ok(())
    }

    // ========== Samples ==========

    /// Accounts one access sample.
    ///
    /// Samples for unknown tenants or addresses are dropped. Every accounted
    /// sample may trigger threshold adaptation and a tenant decay event.
    pub fn on_access(&self, event: &AccessEvent) -> AccessOutcome {
        let Ok(tenant) = self.tenant(event.tenant) else {
            SAMPLES_PROCESSED
                .with_label_values(&[event.kind.label(), "false"])
                .inc();
            return AccessOutcome::Untracked;
        };

        let outcome = self.account(&tenant, event);
        let label = match outcome {
            AccessOutcome::Tracked { .. } => "true",
            AccessOutcome::Untracked => "false",
        };
        SAMPLES_PROCESSED
            .with_label_values(&[event.kind.label(), label])
            .inc();

        self.after_sample(&tenant);
        outcome
    }

    fn account(&self, tenant: &TenantAccounting, event: &AccessEvent) -> AccessOutcome {
        let Some(location) = tenant.locate(event.address) else {
            tracing::trace!(tenant_id = %tenant.id(), address = %event.address, "Sample for untracked address");
            return AccessOutcome::Untracked;
        };
        let Ok(state) = tenant.tier(location.tier) else {
            return AccessOutcome::Untracked;
        };

        let effect = state.lock().record_access(
            location.address,
            event.address.subunit_index(),
            self.accounting.access_weight,
            &self.advisor,
        );
        // Unit moved or vanished between lookup and lock
        let Some(effect) = effect else {
            return AccessOutcome::Untracked;
        };

        self.issue(tenant.id(), location.tier, location.address, effect.placement);
        AccessOutcome::Tracked {
            tier: location.tier,
            bin: effect.bin,
            placement: effect.placement,
        }
    }

    fn issue(&self, tenant: TenantId, tier: TierId, address: UnitAddress, placement: Option<Placement>) {
        match placement {
            Some(Placement::FastEligible) => self.placement.move_to_fast_eligible(tenant, tier, address),
            Some(Placement::ColdEligible) => self.placement.move_to_cold_eligible(tenant, tier, address),
            None => {}
        }
    }

    fn after_sample(&self, tenant: &TenantAccounting) {
        let counters = &tenant.counters;
        let processed = counters.processed.fetch_add(1, Ordering::Relaxed) + 1;

        // Adaptation first so a decay landing on the same sample finds
        // cooling already acknowledged.
        if claim_period(&counters.last_adaptation_sample, processed, self.adaptation_period_samples) {
            if let Err(e) = self.adapt(tenant) {
                tracing::warn!(tenant_id = %tenant.id(), error = %e, "Threshold adaptation failed");
            }
        }

        let deferred = counters.decay_deferred.swap(false, Ordering::AcqRel);
        let by_samples = claim_period(
            &counters.last_decay_sample,
            processed,
            self.accounting.decay_period_samples,
        );
        let by_growth = claim_period(
            &counters.pages_at_last_decay,
            tenant.tracked_pages(),
            self.accounting.allocation_delta_pages,
        );
        if deferred || by_samples || by_growth {
            self.decay(tenant);
        }
    }

    // ========== Decay & adaptation ==========

    /// Runs a decay event for a tenant now.
    ///
    /// Returns `None` if another decay of the tenant is in progress; the event
    /// is then retried on the tenant's next sample.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the tenant is not registered.
    pub fn decay_tenant(&self, tenant_id: TenantId) -> CoreResult<Option<DecayOutcome>> {
        let tenant = self.tenant(tenant_id)?;
        tenant
            .counters
            .last_decay_sample
            .store(tenant.samples_processed(), Ordering::Relaxed);
        Ok(self.decay(&tenant))
    }

    fn decay(&self, tenant: &TenantAccounting) -> Option<DecayOutcome> {
        let counters = &tenant.counters;
        if counters
            .decay_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            counters.decay_deferred.store(true, Ordering::Release);
            tracing::debug!(tenant_id = %tenant.id(), "Decay already running, deferring");
            return None;
        }

        let mut guards: Vec<_> = tenant.tiers().iter().map(|tier| tier.lock()).collect();

        // A tier whose last cooling has not been acknowledged by adaptation
        // defers the wipe; the generation still advances.
        let reset = !guards.iter().any(|g| g.accounting().cooling_pending);
        let (seen, fast) = guards.iter().fold((0u64, 0u64), |(seen, fast), g| {
            let acc = g.accounting();
            (seen + acc.samples_seen, fast + acc.fast_tier_samples)
        });
        let previous = guards
            .first()
            .map_or(0, |g| g.accounting().running_fast_estimate);
        let ratio = if seen == 0 { previous } else { fast * 1000 / seen };
        let fast_estimate = (previous + ratio) / 2;

        for guard in guards.iter_mut() {
            guard.advance_generation(reset, fast_estimate);
        }
        let generation = guards.first().map_or(0, |g| g.accounting().decay_generation);
        drop(guards);

        counters
            .pages_at_last_decay
            .store(tenant.tracked_pages(), Ordering::Relaxed);
        counters.decay_running.store(false, Ordering::Release);

        DECAY_EVENTS
            .with_label_values(&[if reset { "applied" } else { "deferred" }])
            .inc();
        tracing::debug!(
            tenant_id = %tenant.id(),
            generation,
            reset,
            fast_estimate,
            "Tenant decay event"
        );

        Some(DecayOutcome {
            generation,
            reset,
            fast_estimate,
        })
    }

    /// Recomputes a tenant's cutoffs now.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the tenant is not registered.
    pub fn adapt_tenant(&self, tenant_id: TenantId) -> CoreResult<AdaptationOutcome> {
        let tenant = self.tenant(tenant_id)?;
        tenant
            .counters
            .last_adaptation_sample
            .store(tenant.samples_processed(), Ordering::Relaxed);
        self.adapt(&tenant)
    }

    fn adapt(&self, tenant: &TenantAccounting) -> CoreResult<AdaptationOutcome> {
        let mut histogram = HotnessHistogram::new();
        let mut estimated = HotnessHistogram::new();
        let mut skew = SkewDistribution::default();
        let mut post_decay = false;
        let mut current = None;

        for tier in tenant.tiers() {
            let guard = tier.lock();
            let acc = guard.accounting();
            histogram.merge(&acc.histogram);
            estimated.merge(&acc.estimated_base_histogram);
            skew.merge(&acc.skew_distribution);
            post_decay |= acc.post_decay;
            current.get_or_insert((acc.thresholds, acc.split));
        }

        let (thresholds, split) =
            current.ok_or_else(|| CoreError::invalid_state("tenant has no tiers"))?;
        let outcome = self.adapter.compute(&AdaptationInput {
            histogram: &histogram,
            estimated_base_histogram: &estimated,
            skew_distribution: &skew,
            fast_capacity: tenant.capacity(TierId::FAST)?,
            current: thresholds,
            split,
            post_decay,
        });

        let moved = outcome.placement_changed(&thresholds);
        let share = split_share(&outcome.split, tenant.tier_count());
        for tier in tenant.tiers() {
            let mut guard = tier.lock();
            let acc = guard.accounting_mut();
            acc.thresholds = outcome.thresholds;
            acc.split = share;
            acc.post_decay = false;
            acc.cooling_pending = false;
            if moved {
                acc.needs_adjusting = true;
            }
        }

        ADAPTATIONS.inc();
        HOT_THRESHOLD
            .with_label_values(&[tenant.name(), "hot"])
            .set(i64::from(outcome.thresholds.hot));
        HOT_THRESHOLD
            .with_label_values(&[tenant.name(), "base_hot"])
            .set(i64::from(outcome.thresholds.base_hot));
        HOT_THRESHOLD
            .with_label_values(&[tenant.name(), "warm"])
            .set(i64::from(outcome.thresholds.warm));

        if moved {
            tracing::info!(
                tenant_id = %tenant.id(),
                hot = outcome.thresholds.hot,
                base_hot = outcome.thresholds.base_hot,
                warm = outcome.thresholds.warm,
                hot_pages = outcome.hot_pages,
                available_pages = outcome.available_pages,
                post_decay = outcome.post_decay,
                "Thresholds adapted"
            );
        } else {
            tracing::debug!(
                tenant_id = %tenant.id(),
                hot = outcome.thresholds.hot,
                split_budget = outcome.split.budget,
                "Thresholds unchanged"
            );
        }

        Ok(outcome)
    }

    // ========== Scheduler support ==========

    /// Current cutoffs of a tenant-tier.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the tenant or tier does not exist.
    pub fn thresholds(&self, tenant_id: TenantId, tier: TierId) -> CoreResult<Thresholds> {
        let tenant = self.tenant(tenant_id)?;
        let thresholds = tenant.tier(tier)?.lock().accounting().thresholds;
        Ok(thresholds)
    }

    /// Pages of tracked units of a tenant on one tier.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the tenant or tier does not exist.
    pub fn tracked_pages(&self, tenant_id: TenantId, tier: TierId) -> CoreResult<u64> {
        let tenant = self.tenant(tenant_id)?;
        let pages = tenant.tier(tier)?.lock().tracked_pages();
        Ok(pages)
    }

    /// Returns `true` if cutoffs moved since the last reclassification.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the tenant or tier does not exist.
    pub fn needs_adjusting(&self, tenant_id: TenantId, tier: TierId) -> CoreResult<bool> {
        let tenant = self.tenant(tenant_id)?;
        let flag = tenant.tier(tier)?.lock().accounting().needs_adjusting;
        Ok(flag)
    }

    /// Re-issues placement requests for units whose eligibility changed
    /// under the current cutoffs. Returns the number of requests issued.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the tenant or tier does not exist.
    pub fn reclassify(&self, tenant_id: TenantId, tier: TierId, limit: usize) -> CoreResult<usize> {
        let tenant = self.tenant(tenant_id)?;
        let changed = tenant.tier(tier)?.lock().reclassify(limit, &self.advisor);
        for &(address, placement) in &changed {
            self.issue(tenant_id, tier, address, Some(placement));
        }
        if !changed.is_empty() {
            tracing::debug!(tenant_id = %tenant_id, %tier, changed = changed.len(), "Reclassified units");
        }
        Ok(changed.len())
    }

    /// Buckets of the given units after pending decay; `None` for units not
    /// tracked on `tier`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the tenant or tier does not exist.
    pub fn unit_hotness(
        &self,
        tenant_id: TenantId,
        tier: TierId,
        addresses: &[UnitAddress],
    ) -> CoreResult<Vec<Option<u8>>> {
        let tenant = self.tenant(tenant_id)?;
        let mut state = tenant.tier(tier)?.lock();
        Ok(addresses
            .iter()
            .map(|&address| state.hotness(address, &self.advisor))
            .collect())
    }

    /// Moves a unit's record and histogram contribution between tiers.
    ///
    /// The source lock is released before the destination lock is taken.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the tenant, either tier, or the unit
    /// on `from` does not exist.
    pub fn apply_migration(
        &self,
        tenant_id: TenantId,
        address: UnitAddress,
        from: TierId,
        to: TierId,
    ) -> CoreResult<()> {
        if from == to {
            return Ok(());
        }
        let tenant = self.tenant(tenant_id)?;
        let source = tenant.tier(from)?;
        let destination = tenant.tier(to)?;

        let unit = source
            .lock()
            .remove(address)
            .ok_or_else(|| CoreError::not_found("unit", address.to_string()))?;
        destination.lock().adopt(address, unit, &self.advisor);
        tenant.index_move(address, to);
        Ok(())
    }

    /// Drains the split requests queued for a tenant-tier.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the tenant or tier does not exist.
    pub fn take_split_requests(&self, tenant_id: TenantId, tier: TierId) -> CoreResult<Vec<UnitAddress>> {
        let tenant = self.tenant(tenant_id)?;
        let requests = tenant.tier(tier)?.lock().take_split_requests();
        Ok(requests)
    }

    /// Makes a large unit eligible for the advisor again after its split
    /// was refused.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the tenant or tier does not exist.
    pub fn cancel_split(&self, tenant_id: TenantId, tier: TierId, address: UnitAddress) -> CoreResult<()> {
        let tenant = self.tenant(tenant_id)?;
        tenant.tier(tier)?.lock().cancel_split(address);
        Ok(())
    }

    /// Replaces a split large unit with its base units. Returns the number of
    /// base units created.
    ///
    /// # Errors
    ///
    /// - `CoreError::NotFound` if the tenant or large unit is not tracked
    /// - `CoreError::InvalidState` if `address` is not a large unit
    pub fn apply_split(&self, tenant_id: TenantId, address: UnitAddress) -> CoreResult<usize> {
        let tenant = self.tenant(tenant_id)?;
        let location = tenant
            .locate(address)
            .filter(|location| location.address == address)
            .ok_or_else(|| CoreError::not_found("unit", address.to_string()))?;
        if location.size != UnitSize::Large {
            return Err(CoreError::invalid_state(format!(
                "unit {address} is not a large unit"
            )));
        }

        let subunits = tenant
            .tier(location.tier)?
            .lock()
            .split_unit(address, &self.advisor)?;
        tenant.index_replace_split(address, location.tier, &subunits);

        tracing::debug!(tenant_id = %tenant_id, tier = %location.tier, %address, "Applied split");
        Ok(subunits.len())
    }

    /// Point-in-time view of a tenant-tier.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the tenant or tier does not exist.
    pub fn snapshot(&self, tenant_id: TenantId, tier: TierId) -> CoreResult<TierSnapshot> {
        let tenant = self.tenant(tenant_id)?;
        let state = tenant.tier(tier)?.lock();
        Ok(TierSnapshot {
            tenant_id,
            tenant_name: tenant.name().to_string(),
            registered_at: tenant.created_at(),
            tier,
            capacity_pages: state.capacity_pages(),
            tracked_pages: state.tracked_pages(),
            units: state.unit_count(),
            pending_splits: state.pending_splits(),
            accounting: state.accounting().clone(),
        })
    }
}

/// Claims the next period if `now` is at least `period` past the stored mark.
fn claim_period(mark: &AtomicU64, now: u64, period: u64) -> bool {
    let previous = mark.load(Ordering::Relaxed);
    now.saturating_sub(previous) >= period
        && mark
            .compare_exchange(previous, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
}

/// Each tier draws from an equal share of the tenant's split budget.
fn split_share(split: &SplitState, tiers: usize) -> SplitState {
    let tiers = tiers.max(1) as u64;
    SplitState {
        threshold: split.threshold,
        budget: split.budget.div_ceil(tiers),
        budget_tail: split.budget_tail.div_ceil(tiers),
    }
}
