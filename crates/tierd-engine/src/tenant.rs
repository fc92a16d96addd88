//! Tenant and tenant-tier accounting state.
//!
//! Every tenant owns one [`TenantTierState`] per tier, each behind its own
//! mutex. Histogram updates for a unit happen under the lock of the tier the
//! unit lives on and are always applied as a decrement-then-increment pair.
//!
//! Contributions are tagged by decay generation: a tier's histograms are
//! wiped at `last_reset_generation`, and a unit normalized before that point
//! is treated as uncounted instead of being decremented again.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tierd_core::{CoreError, CoreResult, TenantConfig, TenantId, TierId, UnitAddress, SUBUNITS_PER_LARGE};

use crate::adaptation::Thresholds;
use crate::bucket::{bucket, threshold_value};
use crate::histogram::{HotnessHistogram, SkewDistribution};
use crate::placement::Placement;
use crate::record::{AccessRecord, Backing, LargeUnitSummary, TrackedUnit, UnitKind, UnitSize};
use crate::split::{SplitAdvisor, SplitDecision, SplitState};

/// Registration data for a tenant.
#[derive(Debug, Clone)]
pub struct TenantSpec {
    /// Tenant identifier
    pub id: TenantId,
    /// Human-readable name
    pub name: String,
    /// Capacity in pages per tier, fastest first
    pub tier_capacities: Vec<u64>,
    /// Whether the scheduler may move this tenant's memory
    pub tiering_enabled: bool,
}

impl TenantSpec {
    /// Creates a spec with a fresh identifier and tiering enabled.
    #[must_use]
    pub fn new(name: impl Into<String>, tier_capacities: Vec<u64>) -> Self {
        Self {
            id: TenantId::new(),
            name: name.into(),
            tier_capacities,
            tiering_enabled: true,
        }
    }

    /// Creates a spec from a configured tenant.
    #[must_use]
    pub fn from_config(config: &TenantConfig) -> Self {
        Self {
            tiering_enabled: config.tiering_enabled,
            ..Self::new(config.name.clone(), config.tier_capacities.clone())
        }
    }
}

/// Histograms, cutoffs and counters of one tenant-tier.
#[derive(Debug, Clone, Serialize)]
pub struct TierAccounting {
    /// Page-granular hotness histogram (a large unit counts 512)
    pub histogram: HotnessHistogram,
    /// One count per base unit or sub-unit
    pub estimated_base_histogram: HotnessHistogram,
    /// Large units per skew bucket since the last reset
    pub skew_distribution: SkewDistribution,
    /// Cutoffs in force
    pub thresholds: Thresholds,
    /// Split cutoff and budgets
    pub split: SplitState,
    /// Decay events seen by this tenant
    pub decay_generation: u64,
    /// Generation at which the histograms were last wiped
    pub last_reset_generation: u64,
    /// A decay happened and adaptation has not run since
    pub cooling_pending: bool,
    /// Next adaptation runs in post-decay mode
    pub post_decay: bool,
    /// Cutoffs moved; tracked units need reclassification
    pub needs_adjusting: bool,
    /// Samples on this tier since the last decay
    pub samples_seen: u64,
    /// Samples on the fast tier since the last decay
    pub fast_tier_samples: u64,
    /// Smoothed per-mille share of samples landing on the fast tier
    pub running_fast_estimate: u64,
}

impl TierAccounting {
    fn new(thresholds: Thresholds, split: SplitState) -> Self {
        Self {
            histogram: HotnessHistogram::new(),
            estimated_base_histogram: HotnessHistogram::new(),
            skew_distribution: SkewDistribution::default(),
            thresholds,
            split,
            decay_generation: 0,
            last_reset_generation: 0,
            cooling_pending: false,
            post_decay: false,
            needs_adjusting: false,
            samples_seen: 0,
            fast_tier_samples: 0,
            running_fast_estimate: 0,
        }
    }

    /// Returns `true` if the unit's contribution survives in the histograms.
    #[must_use]
    pub fn contributes(&self, unit: &TrackedUnit) -> bool {
        unit.last_decay_generation() >= self.last_reset_generation
    }

    fn count_in(&mut self, unit: &TrackedUnit) {
        self.histogram.add(unit.cached_bin, unit.pages());
        match &unit.kind {
            UnitKind::Base(record) => self.estimated_base_histogram.add(record.bin(), 1),
            UnitKind::Large(summary) => {
                for sub in summary.subunits() {
                    self.estimated_base_histogram.add(sub.bin(), 1);
                }
            }
        }
    }

    fn count_out(&mut self, unit: &TrackedUnit) {
        if !self.contributes(unit) {
            return;
        }
        self.histogram.remove(unit.cached_bin, unit.pages());
        match &unit.kind {
            UnitKind::Base(record) => {
                self.estimated_base_histogram.remove(record.bin(), 1);
            }
            UnitKind::Large(summary) => {
                for sub in summary.subunits() {
                    self.estimated_base_histogram.remove(sub.bin(), 1);
                }
            }
        }
    }

    /// Applies pending decay to `unit`.
    fn normalize(&mut self, unit: &mut TrackedUnit, advisor: &SplitAdvisor) -> Option<SplitDecision> {
        if unit.last_decay_generation() >= self.decay_generation {
            return None;
        }
        let counted = self.contributes(unit);
        self.refresh(unit, counted, advisor)
    }

    /// Counts a unit arriving from another tier.
    fn adopt(&mut self, unit: &mut TrackedUnit, advisor: &SplitAdvisor) -> Option<SplitDecision> {
        if unit.last_decay_generation() < self.decay_generation {
            self.refresh(unit, false, advisor)
        } else {
            self.count_in(unit);
            None
        }
    }

    fn refresh(
        &mut self,
        unit: &mut TrackedUnit,
        counted: bool,
        advisor: &SplitAdvisor,
    ) -> Option<SplitDecision> {
        let generation = self.decay_generation;
        let diff = generation.saturating_sub(unit.last_decay_generation());
        let base_hot = self.thresholds.base_hot;
        let mut decision = None;

        match &mut unit.kind {
            UnitKind::Base(record) => {
                let before = record.bin();
                record.cool(diff);
                record.last_decay_generation = generation;
                let after = record.bin();
                record.predicted_hot = after >= base_hot;
                if counted {
                    self.estimated_base_histogram.transfer(before, after, 1);
                } else {
                    self.estimated_base_histogram.add(after, 1);
                }
            }
            UnitKind::Large(summary) => {
                let estimate = &mut self.estimated_base_histogram;
                summary.cool(diff, generation, base_hot, |before, after| {
                    if counted {
                        estimate.transfer(before, after, 1);
                    } else {
                        estimate.add(after, 1);
                    }
                });
                summary.current_bin = bucket(summary.decayed_total);
                self.skew_distribution.record(summary.skew_bucket);
                decision = Some(advisor.advise(summary, &mut self.split));
            }
        }

        let new_bin = unit.current_bin();
        if counted {
            self.histogram.transfer(unit.cached_bin, new_bin, unit.pages());
        } else {
            self.histogram.add(new_bin, unit.pages());
        }
        unit.cached_bin = new_bin;
        decision
    }

    /// Counts one access and re-buckets the unit. Returns the new unit bucket.
    fn touch(&mut self, unit: &mut TrackedUnit, subunit: usize, weight: u64) -> u8 {
        let base_hot = self.thresholds.base_hot;
        match &mut unit.kind {
            UnitKind::Base(record) => {
                let before = record.bin();
                record.touch(weight);
                let after = record.bin();
                record.predicted_hot = after >= base_hot;
                self.estimated_base_histogram.transfer(before, after, 1);
            }
            UnitKind::Large(summary) => {
                let (before, after) = summary.touch(subunit, weight);
                summary.subunit_mut(subunit).predicted_hot = after >= base_hot;
                summary.current_bin = bucket(summary.decayed_total);
                self.estimated_base_histogram.transfer(before, after, 1);
            }
        }

        let new_bin = unit.current_bin();
        self.histogram.transfer(unit.cached_bin, new_bin, unit.pages());
        unit.cached_bin = new_bin;
        new_bin
    }

    fn classify(&self, unit: &mut TrackedUnit) -> Option<Placement> {
        if unit.cached_bin >= self.thresholds.hot {
            unit.fast_eligible = true;
            Some(Placement::FastEligible)
        } else if unit.fast_eligible {
            unit.fast_eligible = false;
            Some(Placement::ColdEligible)
        } else {
            None
        }
    }
}

/// Effect of one accounted access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessEffect {
    /// Unit bucket after the access
    pub bin: u8,
    /// Placement request to issue once the lock is released
    pub placement: Option<Placement>,
    /// Split advisor verdict if pending decay was applied to a large unit
    pub split: Option<SplitDecision>,
}

/// Accounting state of one tenant on one tier.
#[derive(Debug)]
pub struct TenantTierState {
    tier: TierId,
    capacity_pages: u64,
    accounting: TierAccounting,
    units: HashMap<UnitAddress, TrackedUnit>,
    split_queue: VecDeque<UnitAddress>,
    tracked_pages: u64,
}

impl TenantTierState {
    /// Creates empty state for `tier`.
    #[must_use]
    pub fn new(tier: TierId, capacity_pages: u64, thresholds: Thresholds, split: SplitState) -> Self {
        Self {
            tier,
            capacity_pages,
            accounting: TierAccounting::new(thresholds, split),
            units: HashMap::new(),
            split_queue: VecDeque::new(),
            tracked_pages: 0,
        }
    }

    /// Tier this state belongs to.
    #[must_use]
    pub fn tier(&self) -> TierId {
        self.tier
    }

    /// Tier capacity in pages.
    #[must_use]
    pub fn capacity_pages(&self) -> u64 {
        self.capacity_pages
    }

    /// Pages of all tracked units on this tier.
    #[must_use]
    pub fn tracked_pages(&self) -> u64 {
        self.tracked_pages
    }

    /// Number of tracked units on this tier.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Histograms, cutoffs and counters.
    #[must_use]
    pub fn accounting(&self) -> &TierAccounting {
        &self.accounting
    }

    pub(crate) fn accounting_mut(&mut self) -> &mut TierAccounting {
        &mut self.accounting
    }

    /// Tracked unit at `address`.
    #[must_use]
    pub fn unit(&self, address: UnitAddress) -> Option<&TrackedUnit> {
        self.units.get(&address)
    }

    /// Large units waiting for the split executor.
    #[must_use]
    pub fn pending_splits(&self) -> usize {
        self.split_queue.len()
    }

    /// Starts tracking a new unit seeded at the hot cutoff.
    pub(crate) fn attach(&mut self, address: UnitAddress, size: UnitSize, backing: Backing) {
        let generation = self.accounting.decay_generation;
        let seed = threshold_value(self.accounting.thresholds.hot);
        let kind = match size {
            UnitSize::Base => UnitKind::Base(AccessRecord::seeded(seed, generation)),
            UnitSize::Large => UnitKind::Large(Box::new(LargeUnitSummary::new(seed, generation))),
        };
        let mut unit = TrackedUnit {
            kind,
            backing,
            cached_bin: 0,
            fast_eligible: false,
        };
        unit.cached_bin = unit.current_bin();
        self.insert(address, unit);
    }

    fn insert(&mut self, address: UnitAddress, unit: TrackedUnit) {
        self.accounting.count_in(&unit);
        self.tracked_pages += unit.pages();
        self.units.insert(address, unit);
    }

    /// Stops tracking a unit and withdraws its contribution.
    pub(crate) fn remove(&mut self, address: UnitAddress) -> Option<TrackedUnit> {
        let mut unit = self.units.remove(&address)?;
        self.accounting.count_out(&unit);
        self.tracked_pages = self.tracked_pages.saturating_sub(unit.pages());

        let queued = self.split_queue.len();
        self.split_queue.retain(|pending| *pending != address);
        if self.split_queue.len() != queued {
            if let UnitKind::Large(summary) = &mut unit.kind {
                summary.split_queued = false;
            }
        }
        Some(unit)
    }

    /// Takes ownership of a unit migrated from another tier.
    pub(crate) fn adopt(&mut self, address: UnitAddress, mut unit: TrackedUnit, advisor: &SplitAdvisor) {
        let decision = self.accounting.adopt(&mut unit, advisor);
        self.tracked_pages += unit.pages();
        self.units.insert(address, unit);
        self.queue_if_approved(address, decision);
    }

    /// Accounts one access on `address`.
    ///
    /// Returns `None` if the unit is not tracked on this tier.
    pub(crate) fn record_access(
        &mut self,
        address: UnitAddress,
        subunit: usize,
        weight: u64,
        advisor: &SplitAdvisor,
    ) -> Option<AccessEffect> {
        let unit = self.units.get_mut(&address)?;

        let split = self.accounting.normalize(unit, advisor);
        let bin = self.accounting.touch(unit, subunit, weight);
        let placement = self.accounting.classify(unit);

        self.accounting.samples_seen += 1;
        if self.tier.is_fast() {
            self.accounting.fast_tier_samples += 1;
        }

        self.queue_if_approved(address, split);
        Some(AccessEffect {
            bin,
            placement,
            split,
        })
    }

    /// Re-evaluates tracked units against the current cutoffs.
    ///
    /// Returns at most `limit` units whose eligibility flipped. Clears
    /// `needs_adjusting` once a pass finds fewer than `limit` changes.
    pub(crate) fn reclassify(
        &mut self,
        limit: usize,
        advisor: &SplitAdvisor,
    ) -> Vec<(UnitAddress, Placement)> {
        let mut changed = Vec::new();
        let mut approved = Vec::new();

        for (address, unit) in self.units.iter_mut() {
            if changed.len() >= limit {
                break;
            }
            if let Some(decision) = self.accounting.normalize(unit, advisor) {
                if decision.is_approved() {
                    approved.push(*address);
                }
            }
            let hot = unit.cached_bin >= self.accounting.thresholds.hot;
            if hot != unit.fast_eligible {
                if let Some(placement) = self.accounting.classify(unit) {
                    changed.push((*address, placement));
                }
            }
        }

        self.split_queue.extend(approved);
        if changed.len() < limit {
            self.accounting.needs_adjusting = false;
        }
        changed
    }

    /// Bucket of a unit after pending decay is applied.
    pub(crate) fn hotness(&mut self, address: UnitAddress, advisor: &SplitAdvisor) -> Option<u8> {
        let unit = self.units.get_mut(&address)?;
        let decision = self.accounting.normalize(unit, advisor);
        let bin = unit.cached_bin;
        self.queue_if_approved(address, decision);
        Some(bin)
    }

    /// Drains the split queue.
    pub(crate) fn take_split_requests(&mut self) -> Vec<UnitAddress> {
        self.split_queue.drain(..).collect()
    }

    /// Clears the queued mark of a large unit whose split did not happen.
    pub(crate) fn cancel_split(&mut self, address: UnitAddress) {
        if let Some(TrackedUnit {
            kind: UnitKind::Large(summary),
            ..
        }) = self.units.get_mut(&address)
        {
            summary.split_queued = false;
        }
    }

    /// Replaces a large unit with base units that keep their sub-unit records.
    ///
    /// Returns the addresses of the new base units.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the unit is not tracked here and
    /// `CoreError::InvalidState` if it is not a large unit.
    pub(crate) fn split_unit(
        &mut self,
        address: UnitAddress,
        advisor: &SplitAdvisor,
    ) -> CoreResult<Vec<UnitAddress>> {
        let unit = self
            .units
            .get_mut(&address)
            .ok_or_else(|| CoreError::not_found("unit", address.to_string()))?;
        if !unit.is_large() {
            return Err(CoreError::invalid_state(format!(
                "unit {address} is not a large unit"
            )));
        }
        self.accounting.normalize(unit, advisor);

        let Some(TrackedUnit {
            kind: UnitKind::Large(summary),
            backing,
            fast_eligible,
            ..
        }) = self.remove(address)
        else {
            return Err(CoreError::internal(format!("unit {address} vanished while splitting")));
        };

        let mut addresses = Vec::with_capacity(SUBUNITS_PER_LARGE);
        for (index, record) in summary.into_subunits().iter().enumerate() {
            let sub_address = address.subunit(index);
            let unit = TrackedUnit {
                kind: UnitKind::Base(*record),
                backing,
                cached_bin: record.bin(),
                fast_eligible,
            };
            self.insert(sub_address, unit);
            addresses.push(sub_address);
        }
        Ok(addresses)
    }

    /// Advances the decay generation, wiping histograms when `reset` is set.
    pub(crate) fn advance_generation(&mut self, reset: bool, fast_estimate: u64) {
        let acc = &mut self.accounting;
        acc.decay_generation += 1;
        if reset {
            acc.histogram.reset();
            acc.estimated_base_histogram.reset();
            acc.skew_distribution.reset();
            acc.last_reset_generation = acc.decay_generation;
        }
        acc.running_fast_estimate = fast_estimate;
        acc.samples_seen = 0;
        acc.fast_tier_samples = 0;
        acc.cooling_pending = true;
        acc.post_decay = true;
    }

    fn queue_if_approved(&mut self, address: UnitAddress, decision: Option<SplitDecision>) {
        if decision.is_some_and(|d| d.is_approved()) {
            self.split_queue.push_back(address);
        }
    }
}

/// Where an address is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitLocation {
    /// Tier holding the unit
    pub tier: TierId,
    /// Key of the tracked unit (the large unit start for sub-unit addresses)
    pub address: UnitAddress,
    /// Size of the tracked unit
    pub size: UnitSize,
}

#[derive(Debug, Default)]
pub(crate) struct SampleCounters {
    pub(crate) processed: AtomicU64,
    pub(crate) last_decay_sample: AtomicU64,
    pub(crate) last_adaptation_sample: AtomicU64,
    pub(crate) tracked_pages: AtomicU64,
    pub(crate) pages_at_last_decay: AtomicU64,
    pub(crate) decay_running: AtomicBool,
    pub(crate) decay_deferred: AtomicBool,
}

/// Accounting state of one tenant across all of its tiers.
#[derive(Debug)]
pub struct TenantAccounting {
    id: TenantId,
    name: String,
    created_at: DateTime<Utc>,
    capacities: Vec<u64>,
    tiers: Vec<Mutex<TenantTierState>>,
    unit_index: RwLock<HashMap<UnitAddress, (TierId, UnitSize)>>,
    tiering_enabled: AtomicBool,
    pub(crate) counters: SampleCounters,
}

impl TenantAccounting {
    pub(crate) fn new(spec: TenantSpec, thresholds: Thresholds, split: SplitState) -> Self {
        let tiers = spec
            .tier_capacities
            .iter()
            .enumerate()
            .map(|(index, &capacity)| {
                Mutex::new(TenantTierState::new(
                    TierId(index as u8),
                    capacity,
                    thresholds,
                    split,
                ))
            })
            .collect();

        Self {
            id: spec.id,
            name: spec.name,
            created_at: Utc::now(),
            capacities: spec.tier_capacities,
            tiers,
            unit_index: RwLock::new(HashMap::new()),
            tiering_enabled: AtomicBool::new(spec.tiering_enabled),
            counters: SampleCounters::default(),
        }
    }

    /// Tenant identifier.
    #[must_use]
    pub fn id(&self) -> TenantId {
        self.id
    }

    /// Tenant name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registration time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Number of tiers the tenant spans.
    #[must_use]
    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    /// Capacity of `tier` in pages.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the tenant has no such tier.
    pub fn capacity(&self, tier: TierId) -> CoreResult<u64> {
        self.capacities
            .get(tier.index())
            .copied()
            .ok_or_else(|| CoreError::not_found("tier", tier.to_string()))
    }

    /// Locked state of `tier`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the tenant has no such tier.
    pub fn tier(&self, tier: TierId) -> CoreResult<&Mutex<TenantTierState>> {
        self.tiers
            .get(tier.index())
            .ok_or_else(|| CoreError::not_found("tier", tier.to_string()))
    }

    pub(crate) fn tiers(&self) -> &[Mutex<TenantTierState>] {
        &self.tiers
    }

    /// Returns `true` if the scheduler may move this tenant's memory.
    #[must_use]
    pub fn is_tiering_enabled(&self) -> bool {
        self.tiering_enabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_tiering_enabled(&self, enabled: bool) {
        self.tiering_enabled.store(enabled, Ordering::Release);
    }

    /// Samples accounted to this tenant, tracked or not.
    #[must_use]
    pub fn samples_processed(&self) -> u64 {
        self.counters.processed.load(Ordering::Relaxed)
    }

    /// Pages of all tracked units across tiers.
    #[must_use]
    pub fn tracked_pages(&self) -> u64 {
        self.counters.tracked_pages.load(Ordering::Relaxed)
    }

    /// Resolves an accessed address to the tracked unit containing it.
    #[must_use]
    pub fn locate(&self, address: UnitAddress) -> Option<UnitLocation> {
        let index = self.unit_index.read();
        let base = address.base_aligned();
        if let Some(&(tier, size)) = index.get(&base) {
            return Some(UnitLocation {
                tier,
                address: base,
                size,
            });
        }
        let large = address.large_aligned();
        match index.get(&large) {
            Some(&(tier, UnitSize::Large)) => Some(UnitLocation {
                tier,
                address: large,
                size: UnitSize::Large,
            }),
            _ => None,
        }
    }

    /// Claims `address` for a new unit on `tier`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::AlreadyExists` if `address` overlaps a tracked unit.
    pub(crate) fn reserve(&self, address: UnitAddress, tier: TierId, size: UnitSize) -> CoreResult<()> {
        let mut index = self.unit_index.write();
        let overlaps = match size {
            UnitSize::Base => {
                index.contains_key(&address)
                    || matches!(
                        index.get(&address.large_aligned()),
                        Some((_, UnitSize::Large))
                    )
            }
            UnitSize::Large => {
                (0..SUBUNITS_PER_LARGE).any(|i| index.contains_key(&address.subunit(i)))
            }
        };
        if overlaps {
            return Err(CoreError::already_exists("unit", address.to_string()));
        }
        index.insert(address, (tier, size));
        Ok(())
    }

    pub(crate) fn index_move(&self, address: UnitAddress, tier: TierId) {
        if let Some(entry) = self.unit_index.write().get_mut(&address) {
            entry.0 = tier;
        }
    }

    pub(crate) fn index_remove(&self, address: UnitAddress) {
        self.unit_index.write().remove(&address);
    }

    pub(crate) fn index_replace_split(&self, address: UnitAddress, tier: TierId, subunits: &[UnitAddress]) {
        let mut index = self.unit_index.write();
        index.remove(&address);
        for sub in subunits {
            index.insert(*sub, (tier, UnitSize::Base));
        }
    }
}
