use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

use tierd_core::{metrics, CoreResult, TenantId, TierId, TierdConfig};
use tierd_engine::{
    AccessOutcome, HotnessEngine, SchedulerBackends, SimulatedMemory, TenantSpec,
    TierSnapshot, TieringScheduler,
};

mod workload;

use workload::{UnitSpec, Workload, WorkloadShape};

#[derive(Parser, Debug)]
#[command(name = "tierd-sim")]
#[command(about = "Drive the tierd placement engine with a synthetic workload", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: layered lookup, see TIERD_CONFIG)
    #[arg(long, env = "TIERD_SIM_CONFIG")]
    config: Option<PathBuf>,

    /// Access samples per tenant
    #[arg(long, default_value_t = 200_000)]
    samples: u64,

    /// Samples per tenant between scheduler ticks
    #[arg(long, default_value_t = 5_000)]
    batch: u64,

    /// Pause after every batch in milliseconds
    #[arg(long, default_value_t = 20)]
    tick_ms: u64,

    /// Base units per tenant
    #[arg(long, default_value_t = 20_000)]
    base_units: u64,

    /// Large units per tenant
    #[arg(long, default_value_t = 16)]
    large_units: u64,

    /// Fraction of units in the hot set
    #[arg(long, default_value_t = 0.1)]
    hot_fraction: f64,

    /// Fraction of samples hitting the hot set
    #[arg(long, default_value_t = 0.9)]
    hot_share: f64,

    /// Fraction of base units backed by files
    #[arg(long, default_value_t = 0.25)]
    file_fraction: f64,

    /// Probability that a unit fails to migrate
    #[arg(long, default_value_t = 0.0)]
    failure_rate: f64,

    /// Simulated latency of one migration batch in milliseconds
    #[arg(long, default_value_t = 0)]
    migration_latency_ms: u64,

    /// Workload seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Print Prometheus metrics after the report
    #[arg(long, default_value = "false")]
    metrics: bool,
}

#[derive(Debug, Serialize)]
struct SimReport {
    samples_tracked: u64,
    samples_untracked: u64,
    interrupted: bool,
    elapsed_ms: u64,
    migration_batches: usize,
    tenants: Vec<TenantReport>,
}

#[derive(Debug, Serialize)]
struct TenantReport {
    tenant_id: TenantId,
    name: String,
    /// Hot-set pages resident on the fastest tier
    hot_pages_on_fast: u64,
    hot_pages: u64,
    tiers: Vec<TierSnapshot>,
}

struct SimTenant {
    id: TenantId,
    name: String,
    workload: Workload,
}

/// Tenants used when the configuration names none.
fn default_tenants() -> Vec<TenantSpec> {
    vec![
        TenantSpec::new("web", vec![40_000, 1_000_000]),
        TenantSpec::new("batch", vec![32_000, 1_000_000]),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    metrics::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => TierdConfig::from_file(path)?,
        None => TierdConfig::load()?,
    };

    let specs = if config.tenants.is_empty() {
        default_tenants()
    } else {
        config.tenants.iter().map(TenantSpec::from_config).collect()
    };
    let tier_count = specs
        .iter()
        .map(|spec| spec.tier_capacities.len())
        .max()
        .unwrap_or(1);

    let sim = Arc::new(SimulatedMemory::new());
    sim.set_failure_rate(cli.failure_rate);
    sim.set_latency(Duration::from_millis(cli.migration_latency_ms));

    let engine = Arc::new(HotnessEngine::new(&config, sim.clone()));
    let mut scheduler = TieringScheduler::new(
        &config,
        tier_count,
        Arc::clone(&engine),
        SchedulerBackends {
            placement: sim.clone(),
            migrator: sim.clone(),
            splitter: sim.clone(),
        },
    );

    let shape = WorkloadShape {
        base_units: cli.base_units,
        large_units: cli.large_units,
        hot_fraction: cli.hot_fraction,
        hot_share: cli.hot_share,
        file_fraction: cli.file_fraction,
    };

    let mut tenants = Vec::with_capacity(specs.len());
    for (index, spec) in specs.into_iter().enumerate() {
        let name = spec.name.clone();
        let capacities = spec.tier_capacities.clone();
        let tenant = engine.register_tenant(spec)?;
        sim.register_tenant(tenant.id(), capacities.len());

        let workload = Workload::new(tenant.id(), shape, cli.seed.wrapping_add(index as u64));
        place_units(&engine, &sim, tenant.id(), &capacities, workload.units())?;
        scheduler.register_tenant(tenant.id())?;

        tracing::info!(
            tenant_id = %tenant.id(),
            tenant = %name,
            units = workload.units().len(),
            tracked_pages = tenant.tracked_pages(),
            "Tenant ready"
        );
        tenants.push(SimTenant {
            id: tenant.id(),
            name,
            workload,
        });
    }

    scheduler.start_workers();
    let started = Instant::now();

    let mut tracked = 0u64;
    let mut untracked = 0u64;
    let mut interrupted = false;
    let mut remaining = cli.samples;
    let batch = cli.batch.max(1);

    while remaining > 0 {
        let n = remaining.min(batch);
        for tenant in tenants.iter_mut() {
            for _ in 0..n {
                let Some(event) = tenant.workload.next_event() else {
                    break;
                };
                match engine.on_access(&event) {
                    AccessOutcome::Tracked { .. } => tracked += 1,
                    AccessOutcome::Untracked => untracked += 1,
                }
            }
        }
        remaining -= n;

        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(cli.tick_ms)) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!(remaining, "Interrupted, stopping workload");
                interrupted = true;
                break;
            }
        }
    }

    scheduler.shutdown().await?;

    let mut reports = Vec::with_capacity(tenants.len());
    for tenant in &tenants {
        reports.push(tenant_report(&engine, tenant)?);
    }
    let report = SimReport {
        samples_tracked: tracked,
        samples_untracked: untracked,
        interrupted,
        elapsed_ms: started.elapsed().as_millis() as u64,
        migration_batches: sim.batches(),
        tenants: reports,
    };

    tracing::info!(
        samples = tracked,
        batches = report.migration_batches,
        elapsed_ms = report.elapsed_ms,
        "Simulation finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    if cli.metrics {
        println!("{}", metrics::gather_text());
    }

    Ok(())
}

/// First-touch placement: fill each tier down to its demotion watermark,
/// fastest first, and spill the rest to the slowest tier.
fn place_units(
    engine: &HotnessEngine,
    sim: &SimulatedMemory,
    tenant: TenantId,
    capacities: &[u64],
    units: &[UnitSpec],
) -> CoreResult<()> {
    let mut tier = 0usize;
    let mut used = 0u64;

    for unit in units {
        let last = capacities.len().saturating_sub(1);
        while tier < last {
            let room = capacities[tier].saturating_sub(engine.watermarks().demotion_watermark(capacities[tier]));
            if used + unit.pages() <= room {
                break;
            }
            tier += 1;
            used = 0;
        }

        let tier_id = TierId(tier as u8);
        sim.add_unit(tenant, tier_id, unit.address, unit.pages(), unit.backing);
        engine.attach_unit(tenant, tier_id, unit.address, unit.size, unit.backing)?;
        used += unit.pages();
    }
    Ok(())
}

fn tenant_report(engine: &HotnessEngine, tenant: &SimTenant) -> CoreResult<TenantReport> {
    let accounting = engine.tenant(tenant.id)?;

    let mut hot_pages = 0;
    let mut hot_pages_on_fast = 0;
    for unit in tenant.workload.hot_units() {
        hot_pages += unit.pages();
        // split large units are located through their first sub-unit
        if accounting
            .locate(unit.address)
            .is_some_and(|location| location.tier == TierId::FAST)
        {
            hot_pages_on_fast += unit.pages();
        }
    }

    let tiers = (0..accounting.tier_count())
        .map(|tier| engine.snapshot(tenant.id, TierId(tier as u8)))
        .collect::<CoreResult<Vec<_>>>()?;

    Ok(TenantReport {
        tenant_id: tenant.id,
        name: tenant.name.clone(),
        hot_pages_on_fast,
        hot_pages,
        tiers,
    })
}

fn init_logging() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tierd=debug"));
    fmt().with_env_filter(env_filter).with_target(false).with_writer(std::io::stderr).init();
}
