//! Integration tests: accounting engine + tiering scheduler + simulated memory.

use std::sync::Arc;
use std::time::Duration;

use tierd_core::{TenantId, TierId, TierdConfig, UnitAddress};
use tierd_engine::{
    AccessEvent, AccessKind, ActionBudget, Backing, FailureReason, HotnessEngine, ListKind,
    PlacementList, SchedulerBackends, SimulatedMemory, TenantSpec, TieringScheduler, UnitSize,
};

struct Harness {
    engine: Arc<HotnessEngine>,
    sim: Arc<SimulatedMemory>,
    scheduler: TieringScheduler,
}

fn harness(config: TierdConfig) -> Harness {
    let sim = Arc::new(SimulatedMemory::new());
    let engine = Arc::new(HotnessEngine::new(&config, sim.clone()));
    let scheduler = TieringScheduler::new(
        &config,
        2,
        Arc::clone(&engine),
        SchedulerBackends {
            placement: sim.clone(),
            migrator: sim.clone(),
            splitter: sim.clone(),
        },
    );
    Harness {
        engine,
        sim,
        scheduler,
    }
}

impl Harness {
    fn tenant(&self, name: &str, capacities: Vec<u64>) -> TenantId {
        let tenant = self
            .engine
            .register_tenant(TenantSpec::new(name, capacities.clone()))
            .unwrap();
        self.sim.register_tenant(tenant.id(), capacities.len());
        self.scheduler.register_tenant(tenant.id()).unwrap();
        tenant.id()
    }

    fn attach(&self, tenant: TenantId, tier: u8, address: u64, backing: Backing) {
        let address = UnitAddress(address);
        self.sim.add_unit(tenant, TierId(tier), address, 1, backing);
        self.engine
            .attach_unit(tenant, TierId(tier), address, UnitSize::Base, backing)
            .unwrap();
    }

    fn touch(&self, tenant: TenantId, address: u64, times: usize) {
        for _ in 0..times {
            self.engine.on_access(&AccessEvent {
                tenant,
                address: UnitAddress(address),
                kind: AccessKind::LlcMiss,
            });
        }
    }
}

/// Fast tier of 12_900 pages: the 12_800 demotion floor leaves a 100 page target.
const SMALL_FAST: u64 = 12_900;

#[tokio::test]
async fn test_failed_migration_reappears_unmodified() {
    let h = harness(TierdConfig::default());
    let id = h.tenant("db", vec![SMALL_FAST, 1_000_000]);
    for i in 0..120u64 {
        h.attach(id, 0, (i + 1) << 12, Backing::File);
    }
    // the first file unit on the tail fails with writeback
    let stuck = UnitAddress(1 << 12);
    h.sim.fail_unit(stuck, FailureReason::Writeback);
    let hotness_before = h.engine.unit_hotness(id, TierId(0), &[stuck]).unwrap();

    let report = h.scheduler.run_tier_cycle(TierId(0)).await.unwrap().unwrap();
    let demotion = report.demotion.unwrap();

    assert_eq!(demotion.failed, 1);
    assert_eq!(demotion.migrated, demotion.isolated - 1);
    assert_eq!(h.sim.list_of(id, stuck), Some((TierId(0), ListKind::InactiveFile)));
    assert_eq!(h.engine.unit_hotness(id, TierId(0), &[stuck]).unwrap(), hotness_before);
    let tenant = h.engine.tenant(id).unwrap();
    assert_eq!(tenant.locate(stuck).unwrap().tier, TierId(0));

    // once the writeback clears the unit moves like any other; 100 more
    // units make the excess reach it at the tail of the list
    h.sim.clear_failures();
    for i in 120..220u64 {
        h.attach(id, 0, (i + 1) << 12, Backing::File);
    }
    let report = h.scheduler.run_tier_cycle(TierId(0)).await.unwrap().unwrap();
    let demotion = report.demotion.unwrap();
    assert_eq!(demotion.failed, 0);
    assert_eq!(demotion.migrated, 101);
    assert_eq!(tenant.locate(stuck).unwrap().tier, TierId(1));
}

#[tokio::test]
async fn test_demotion_takes_file_lists_first() {
    let h = harness(TierdConfig::default());
    let id = h.tenant("web", vec![SMALL_FAST, 1_000_000]);
    for i in 0..100u64 {
        h.attach(id, 0, (i + 1) << 12, Backing::Anon);
    }
    for i in 100..140u64 {
        h.attach(id, 0, (i + 1) << 12, Backing::File);
    }

    // 140 occupied against a 100 page target
    let report = h.scheduler.run_tier_cycle(TierId(0)).await.unwrap().unwrap();
    let demotion = report.demotion.unwrap();

    assert_eq!(demotion.migrated, 40);
    assert_eq!(h.sim.list_pages(id, TierId(0), ListKind::InactiveFile), 0);
    assert_eq!(h.sim.list_pages(id, TierId(0), ListKind::InactiveAnon), 100);
    assert_eq!(h.sim.list_pages(id, TierId(1), ListKind::InactiveFile), 40);
    assert_eq!(h.engine.tracked_pages(id, TierId(1)).unwrap(), 40);
}

struct TightBudget;

impl ActionBudget for TightBudget {
    fn promotion_budget(&self, _tenant: TenantId, _tier: TierId) -> u64 {
        3
    }
}

#[tokio::test]
async fn test_promotion_bounded_by_action_budget() {
    let mut h = harness(TierdConfig::default());
    h.scheduler = TieringScheduler::new(
        &TierdConfig::default(),
        2,
        Arc::clone(&h.engine),
        SchedulerBackends {
            placement: h.sim.clone(),
            migrator: h.sim.clone(),
            splitter: h.sim.clone(),
        },
    )
    .with_action_budget(Arc::new(TightBudget));
    let id = h.tenant("cache", vec![100_000, 1_000_000]);

    for i in 0..10u64 {
        let address = (i + 1) << 12;
        h.attach(id, 1, address, Backing::Anon);
        h.touch(id, address, 1);
    }
    assert_eq!(h.sim.list_pages(id, TierId(1), ListKind::ActiveAnon), 10);

    let report = h.scheduler.run_tier_cycle(TierId(1)).await.unwrap().unwrap();
    let promotion = report.promotion.unwrap();

    assert_eq!(promotion.migrated, 3);
    assert_eq!(h.sim.list_pages(id, TierId(0), ListKind::ActiveAnon), 3);
    assert_eq!(h.sim.list_pages(id, TierId(1), ListKind::ActiveAnon), 7);
    assert_eq!(h.engine.tracked_pages(id, TierId(0)).unwrap(), 3);
}

#[tokio::test]
async fn test_round_robin_between_tenants() {
    let h = harness(TierdConfig::default());
    let a = h.tenant("a", vec![100_000, 1_000_000]);
    let b = h.tenant("b", vec![100_000, 1_000_000]);

    let mut served = Vec::new();
    for _ in 0..4 {
        let report = h.scheduler.run_tier_cycle(TierId(0)).await.unwrap().unwrap();
        served.push(report.tenant);
    }
    assert_eq!(served, vec![a, b, a, b]);

    h.engine.unregister_tenant(a).unwrap();
    let report = h.scheduler.run_tier_cycle(TierId(0)).await.unwrap().unwrap();
    assert_eq!(report.tenant, b);
    assert_eq!(h.scheduler.queued_tenants(TierId(0)), 1);
}

#[tokio::test]
async fn test_whole_batch_error_puts_everything_back() {
    let h = harness(TierdConfig::default());
    let id = h.tenant("db", vec![SMALL_FAST, 1_000_000]);
    for i in 0..110u64 {
        h.attach(id, 0, (i + 1) << 12, Backing::File);
    }
    h.sim.fail_next_batch("executor offline");

    assert!(h.scheduler.run_tier_cycle(TierId(0)).await.is_err());
    assert_eq!(h.sim.list_pages(id, TierId(0), ListKind::InactiveFile), 110);
    assert_eq!(h.engine.tracked_pages(id, TierId(0)).unwrap(), 110);

    // retried on the next cycle, still sized to the 10 page excess
    let report = h.scheduler.run_tier_cycle(TierId(0)).await.unwrap().unwrap();
    assert_eq!(report.demotion.unwrap().migrated, 10);
    assert_eq!(h.sim.list_pages(id, TierId(0), ListKind::InactiveFile), 100);
}

#[tokio::test]
async fn test_demotion_reclaims_only_the_excess() {
    let h = harness(TierdConfig::default());
    let id = h.tenant("db", vec![SMALL_FAST, 1_000_000]);
    for i in 0..1_000u64 {
        h.attach(id, 0, (i + 1) << 12, Backing::File);
    }

    let report = h.scheduler.run_tier_cycle(TierId(0)).await.unwrap().unwrap();
    let demotion = report.demotion.unwrap();

    assert_eq!(demotion.isolated, 900);
    assert_eq!(demotion.migrated, 900);
    assert_eq!(h.sim.list_pages(id, TierId(0), ListKind::InactiveFile), 100);
    assert_eq!(h.engine.tracked_pages(id, TierId(0)).unwrap(), 100);

    // at the target nothing more moves
    let report = h.scheduler.run_tier_cycle(TierId(0)).await.unwrap().unwrap();
    assert_eq!(report.demotion.unwrap().isolated, 0);
}

#[tokio::test]
async fn test_demotion_overshoots_by_at_most_one_unit() {
    let h = harness(TierdConfig::default());
    let id = h.tenant("vm", vec![SMALL_FAST, 1_000_000]);
    for i in 0..100u64 {
        h.attach(id, 0, (i + 1) << 12, Backing::File);
    }
    let large = UnitAddress(0x4000_0000);
    h.sim.add_unit(id, TierId(0), large, 512, Backing::File);
    h.engine
        .attach_unit(id, TierId(0), large, UnitSize::Large, Backing::File)
        .unwrap();

    // 612 pages against a 100 page target: the large unit at the tail
    // overshoots the 512 page excess by the base units ahead of it
    let report = h.scheduler.run_tier_cycle(TierId(0)).await.unwrap().unwrap();
    let demotion = report.demotion.unwrap();

    assert_eq!(demotion.isolated, 612);
    assert_eq!(demotion.migrated, 612);
    assert_eq!(h.sim.unit_count(id, TierId(0)), 0);
}

#[tokio::test]
async fn test_promotion_never_consumes_the_reserve() {
    let h = harness(TierdConfig::default());
    // 25_610 pages less the 25_600 reserve leaves 10
    let id = h.tenant("vm", vec![25_610, 1_000_000]);
    let large = UnitAddress(0x20_0000);
    h.sim.add_unit(id, TierId(1), large, 512, Backing::Anon);
    h.engine
        .attach_unit(id, TierId(1), large, UnitSize::Large, Backing::Anon)
        .unwrap();
    h.sim.move_to_fast_eligible(id, TierId(1), large);
    for i in 0..3u64 {
        let address = (i + 1) << 12;
        h.attach(id, 1, address, Backing::Anon);
        h.sim.move_to_fast_eligible(id, TierId(1), UnitAddress(address));
    }
    // cold units are not promotion candidates
    h.attach(id, 1, 0x10_0000, Backing::Anon);

    let report = h.scheduler.run_tier_cycle(TierId(1)).await.unwrap().unwrap();
    let promotion = report.promotion.unwrap();

    assert_eq!(promotion.migrated, 3);
    assert_eq!(promotion.kept, 512);
    assert!(h.sim.occupancy(id, TierId(0)).occupied_pages <= 10);
    assert_eq!(h.sim.list_of(id, large), Some((TierId(1), ListKind::ActiveAnon)));
    assert_eq!(
        h.sim.list_of(id, UnitAddress(0x10_0000)),
        Some((TierId(1), ListKind::InactiveAnon))
    );
    assert_eq!(h.engine.tracked_pages(id, TierId(0)).unwrap(), 3);
}

/// Drives a skewed large unit through decay and adaptation until the
/// advisor approves it from the tail pool.
fn queue_skewed_split(h: &Harness) -> (TenantId, UnitAddress) {
    // 25_700 pages less the 25_600 reserve leaves 100 for hot units
    let id = h.tenant("vm", vec![25_700, 1_000_000]);
    let large = UnitAddress(0x20_0000);
    h.sim.add_unit(id, TierId(1), large, 512, Backing::Anon);
    h.engine
        .attach_unit(id, TierId(1), large, UnitSize::Large, Backing::Anon)
        .unwrap();

    // all heat on sub-unit 0
    h.touch(id, large.0, 400);
    h.engine.decay_tenant(id).unwrap();
    h.touch(id, large.0, 1);
    h.engine.adapt_tenant(id).unwrap();
    let outcome = h.engine.adapt_tenant(id).unwrap();
    assert_eq!(outcome.split.budget_tail, 1);

    h.engine.decay_tenant(id).unwrap();
    h.touch(id, large.0, 1);
    assert_eq!(h.engine.snapshot(id, TierId(1)).unwrap().pending_splits, 1);
    (id, large)
}

#[tokio::test]
async fn test_refused_split_leaves_unit_whole() {
    let h = harness(TierdConfig::default());
    h.sim.set_refuse_splits(true);
    let (id, large) = queue_skewed_split(&h);

    let report = h.scheduler.run_tier_cycle(TierId(1)).await.unwrap().unwrap();

    assert_eq!(report.splits_refused, 1);
    assert_eq!(report.splits_applied, 0);
    assert_eq!(h.engine.snapshot(id, TierId(1)).unwrap().pending_splits, 0);
    let tenant = h.engine.tenant(id).unwrap();
    let location = tenant.locate(large).unwrap();
    assert_eq!(location.size, UnitSize::Large);
    let state = tenant.tier(location.tier).unwrap().lock();
    match &state.unit(large).unwrap().kind {
        tierd_engine::record::UnitKind::Large(summary) => assert!(!summary.split_queued),
        other => panic!("expected a large unit, got {other:?}"),
    }
}

#[tokio::test]
async fn test_approved_split_replaces_large_unit() {
    let h = harness(TierdConfig::default());
    let (id, large) = queue_skewed_split(&h);

    let report = h.scheduler.run_tier_cycle(TierId(1)).await.unwrap().unwrap();

    assert_eq!(report.splits_applied, 1);
    assert_eq!(h.sim.unit_count(id, TierId(0)) + h.sim.unit_count(id, TierId(1)), 512);
    let tenant = h.engine.tenant(id).unwrap();
    assert_eq!(tenant.tracked_pages(), 512);
    assert_eq!(tenant.locate(large.subunit(5)).unwrap().size, UnitSize::Base);
    assert_eq!(tenant.locate(large).unwrap().address, large);
    assert_eq!(tenant.locate(large).unwrap().size, UnitSize::Base);
}

#[tokio::test]
async fn test_shutdown_waits_for_running_cycle() {
    let mut config = TierdConfig::default();
    config.scheduler.cycle_interval_ms = 10;
    config.scheduler.idle_interval_ms = 10;
    let mut h = harness(config);
    let id = h.tenant("db", vec![SMALL_FAST, 1_000_000]);
    for i in 0..110u64 {
        h.attach(id, 0, (i + 1) << 12, Backing::File);
    }
    h.sim.set_latency(Duration::from_millis(200));

    h.scheduler.start_workers();
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.scheduler.shutdown().await.unwrap();

    // the in-flight batch completed instead of being abandoned half-isolated
    assert_eq!(h.sim.batches(), 1);
    assert_eq!(h.engine.tracked_pages(id, TierId(1)).unwrap(), 10);
    assert_eq!(h.sim.list_pages(id, TierId(0), ListKind::InactiveFile), 100);
}
