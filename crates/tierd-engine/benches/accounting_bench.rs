//! Performance benchmarks for the access accounting hot path.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::Rng;

use tierd_core::{TenantId, TierId, TierdConfig, UnitAddress};
use tierd_engine::adaptation::AdaptationInput;
use tierd_engine::{
    AccessEvent, AccessKind, Backing, HotnessEngine, HotnessHistogram, SchedulerBackends,
    SimulatedMemory, SkewDistribution, SplitState, TenantSpec, ThresholdAdapter, Thresholds,
    TieringScheduler, UnitSize, WatermarkCalculator,
};

fn engine_with_units(base_units: u64, large_units: u64) -> (Arc<HotnessEngine>, Arc<SimulatedMemory>, TenantId) {
    let config = TierdConfig::default();
    let sim = Arc::new(SimulatedMemory::new());
    let engine = Arc::new(HotnessEngine::new(&config, sim.clone()));
    let tenant = engine
        .register_tenant(TenantSpec::new("bench", vec![1 << 20, 1 << 24]))
        .unwrap();
    let id = tenant.id();
    sim.register_tenant(id, 2);

    for i in 0..base_units {
        let address = UnitAddress((i + 1) << 12);
        sim.add_unit(id, TierId(1), address, 1, Backing::Anon);
        engine
            .attach_unit(id, TierId(1), address, UnitSize::Base, Backing::Anon)
            .unwrap();
    }
    for i in 0..large_units {
        let address = UnitAddress((i + 1 + (1 << 10)) << 21);
        sim.add_unit(id, TierId(1), address, 512, Backing::Anon);
        engine
            .attach_unit(id, TierId(1), address, UnitSize::Large, Backing::Anon)
            .unwrap();
    }
    (engine, sim, id)
}

fn bench_on_access_base(c: &mut Criterion) {
    let (engine, _sim, id) = engine_with_units(10_000, 0);
    let mut rng = rand::thread_rng();

    c.bench_function("on_access_base_10k_units", |b| {
        b.iter(|| {
            let unit = rng.gen_range(0..10_000u64);
            let event = AccessEvent {
                tenant: id,
                address: UnitAddress((unit + 1) << 12),
                kind: AccessKind::LlcMiss,
            };
            black_box(engine.on_access(black_box(&event)));
        });
    });
}

fn bench_on_access_large(c: &mut Criterion) {
    let (engine, _sim, id) = engine_with_units(0, 64);
    let mut rng = rand::thread_rng();

    c.bench_function("on_access_large_64_units", |b| {
        b.iter(|| {
            let unit = rng.gen_range(0..64u64);
            let offset = rng.gen_range(0..512u64) << 12;
            let event = AccessEvent {
                tenant: id,
                address: UnitAddress(((unit + 1 + (1 << 10)) << 21) + offset),
                kind: AccessKind::Store,
            };
            black_box(engine.on_access(black_box(&event)));
        });
    });
}

fn bench_decay_and_normalize(c: &mut Criterion) {
    let (engine, _sim, id) = engine_with_units(10_000, 16);
    let addresses: Vec<_> = (0..10_000u64).map(|i| UnitAddress((i + 1) << 12)).collect();

    c.bench_function("decay_then_normalize_10k_units", |b| {
        b.iter(|| {
            engine.decay_tenant(id).unwrap();
            // adaptation acknowledges cooling so the next decay resets
            engine.adapt_tenant(id).unwrap();
            black_box(engine.unit_hotness(id, TierId(1), &addresses).unwrap());
        });
    });
}

fn bench_threshold_adaptation(c: &mut Criterion) {
    let config = TierdConfig::default();
    let adapter = ThresholdAdapter::new(
        &config.accounting,
        &config.adaptation,
        &config.split,
        WatermarkCalculator::new(config.watermark.clone()),
    );
    let mut rng = rand::thread_rng();
    let pairs: Vec<(u8, u64)> = (0..=15u8).map(|bin| (bin, rng.gen_range(0..100_000))).collect();
    let histogram = HotnessHistogram::from_pairs(&pairs);
    let mut skew = SkewDistribution::default();
    for _ in 0..1_000 {
        skew.record(rng.gen_range(0..=20));
    }

    c.bench_function("threshold_adaptation", |b| {
        b.iter(|| {
            let input = AdaptationInput {
                histogram: &histogram,
                estimated_base_histogram: &histogram,
                skew_distribution: &skew,
                fast_capacity: 1 << 20,
                current: Thresholds::uniform(1),
                split: SplitState::new(20),
                post_decay: false,
            };
            black_box(adapter.compute(black_box(&input)));
        });
    });
}

fn bench_demotion_cycle(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let config = TierdConfig::default();

    c.bench_function("demotion_cycle_1k_units", |b| {
        b.to_async(&runtime).iter(|| async {
            let sim = Arc::new(SimulatedMemory::new());
            let engine = Arc::new(HotnessEngine::new(&config, sim.clone()));
            let tenant = engine
                .register_tenant(TenantSpec::new("bench", vec![12_900, 1 << 24]))
                .unwrap();
            let id = tenant.id();
            sim.register_tenant(id, 2);
            for i in 0..1_000u64 {
                let address = UnitAddress((i + 1) << 12);
                sim.add_unit(id, TierId(0), address, 1, Backing::File);
                engine
                    .attach_unit(id, TierId(0), address, UnitSize::Base, Backing::File)
                    .unwrap();
            }
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
            scheduler.register_tenant(id).unwrap();
            black_box(scheduler.run_tier_cycle(TierId(0)).await.unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_on_access_base,
    bench_on_access_large,
    bench_decay_and_normalize,
    bench_threshold_adaptation,
    bench_demotion_cycle
);
criterion_main!(benches);
