//! Configuration management for tierd
//!
//! This module provides a centralized configuration system that supports:
//! - YAML/TOML configuration files
//! - Environment variable overrides
//! - Reasonable defaults
//! - Configuration validation
//!
//! All capacities and watermarks are expressed in base pages (4 KiB).

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Highest hotness bucket index.
pub const MAX_BUCKET: u8 = 15;
/// Highest skew bucket index.
pub const MAX_SKEW_BUCKET: u8 = 20;

/// Root configuration structure for tierd
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TierdConfig {
    #[serde(default)]
    pub accounting: AccountingConfig,

    #[serde(default)]
    pub adaptation: AdaptationConfig,

    #[serde(default)]
    pub split: SplitConfig,

    #[serde(default)]
    pub watermark: WatermarkConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

impl TierdConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest priority)
    /// 2. Config file specified by TIERD_CONFIG env var
    /// 3. ./config/tierd.{yaml,toml}
    /// 4. /etc/tierd/tierd.{yaml,toml}
    /// 5. Hardcoded defaults (lowest priority)
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        builder = Self::set_defaults(builder)?;

        builder = builder
            .add_source(File::with_name("/etc/tierd/tierd").required(false))
            .add_source(File::with_name("./config/tierd").required(false));

        if let Ok(config_path) = std::env::var("TIERD_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        // Example: TIERD__SCHEDULER__MAX_PAGES_PER_CYCLE=8192
        builder = builder.add_source(
            Environment::with_prefix("TIERD")
                .separator("__")
                .try_parsing(true),
        );

        let config: TierdConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        tracing::debug!(tenants = config.tenants.len(), "Loaded tierd configuration");
        Ok(config)
    }

    /// Set default values for all configuration options
    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            // Accounting
            .set_default("accounting.access_weight", 1)?
            .set_default("accounting.decay_period_samples", 100_000)?
            .set_default("accounting.allocation_delta_pages", 262_144)?
            .set_default("accounting.min_hot_threshold", 1)?
            // Adaptation
            .set_default("adaptation.adaptation_period_samples", 200_000)?
            .set_default("adaptation.warm_enabled", true)?
            .set_default("adaptation.warm_fill_percent", 75)?
            // Split
            .set_default("split.enabled", true)?
            .set_default("split.initial_threshold", 20)?
            // Watermarks
            .set_default("watermark.demotion_percent", 2)?
            .set_default("watermark.promotion_percent", 3)?
            .set_default("watermark.min_floor", 12_800)?
            .set_default("watermark.min_ceiling", 256_000)?
            .set_default("watermark.max_floor", 25_600)?
            .set_default("watermark.max_ceiling", 384_000)?
            // Scheduler
            .set_default("scheduler.cycle_interval_ms", 500)?
            .set_default("scheduler.idle_interval_ms", 2000)?
            .set_default("scheduler.max_pages_per_cycle", 4096)?
            .set_default("scheduler.scan_chunk", 32)?
            .set_default("scheduler.action_budget_pages", 8)?
            .set_default("scheduler.demotion_safety_margin_pages", 12_800)?
            .set_default("scheduler.min_free_pages", 2560)?
            .set_default("scheduler.reclassify_limit", 4096)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.accounting.validate()?;
        self.adaptation.validate(&self.accounting)?;
        self.split.validate()?;
        self.watermark.validate()?;
        self.scheduler.validate()?;

        for tenant in &self.tenants {
            tenant.validate()?;
        }

        Ok(())
    }

    /// Load configuration from a specific file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: TierdConfig = Self::set_defaults(Config::builder())?
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }
}

/// Hotness accounting configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountingConfig {
    /// Weight added to a record's decayed total per sampled access
    pub access_weight: u64,

    /// Processed samples (per tenant) between decay events
    pub decay_period_samples: u64,

    /// Growth of tracked pages since the last decay that forces a decay event
    pub allocation_delta_pages: u64,

    /// Lowest bucket the hot thresholds may ever reach
    pub min_hot_threshold: u8,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            access_weight: 1,
            decay_period_samples: 100_000,
            allocation_delta_pages: 262_144,
            min_hot_threshold: 1,
        }
    }
}

impl AccountingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.access_weight == 0 {
            return Err(ConfigError::Message(
                "accounting.access_weight must be > 0".to_string(),
            ));
        }
        if self.decay_period_samples == 0 {
            return Err(ConfigError::Message(
                "accounting.decay_period_samples must be > 0".to_string(),
            ));
        }
        if self.allocation_delta_pages == 0 {
            return Err(ConfigError::Message(
                "accounting.allocation_delta_pages must be > 0".to_string(),
            ));
        }
        if self.min_hot_threshold > MAX_BUCKET {
            return Err(ConfigError::Message(format!(
                "accounting.min_hot_threshold must be <= {MAX_BUCKET}"
            )));
        }
        Ok(())
    }
}

/// Threshold adaptation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdaptationConfig {
    /// Processed samples (per tenant) between threshold recomputations
    pub adaptation_period_samples: u64,

    /// Lower the warm threshold when the fast tier is underfilled
    pub warm_enabled: bool,

    /// Fill level (percent of available fast capacity) below which warming kicks in
    pub warm_fill_percent: u64,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            adaptation_period_samples: 200_000,
            warm_enabled: true,
            warm_fill_percent: 75,
        }
    }
}

impl AdaptationConfig {
    fn validate(&self, accounting: &AccountingConfig) -> Result<(), ConfigError> {
        if self.adaptation_period_samples <= accounting.decay_period_samples {
            return Err(ConfigError::Message(
                "adaptation.adaptation_period_samples must be > accounting.decay_period_samples"
                    .to_string(),
            ));
        }
        if self.warm_fill_percent == 0 || self.warm_fill_percent > 100 {
            return Err(ConfigError::Message(
                "adaptation.warm_fill_percent must be in 1..=100".to_string(),
            ));
        }
        Ok(())
    }
}

/// Large-unit split configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SplitConfig {
    /// Allow the split advisor to approve splits at all
    pub enabled: bool,

    /// Skew bucket threshold used until the first adaptation derives one
    pub initial_threshold: u8,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_threshold: MAX_SKEW_BUCKET,
        }
    }
}

impl SplitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_threshold == 0 || self.initial_threshold > MAX_SKEW_BUCKET {
            return Err(ConfigError::Message(format!(
                "split.initial_threshold must be in 1..={MAX_SKEW_BUCKET}"
            )));
        }
        Ok(())
    }
}

/// Watermark clamp configuration
///
/// Defaults are sized for fast tiers of a few hundred MB up to tens of GB:
/// the demotion target lands in 50MB..1000MB, the promotion reserve in 100MB..1500MB.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatermarkConfig {
    /// Share of capacity kept free by demotion (percent)
    pub demotion_percent: u64,

    /// Share of capacity left unfilled by promotion (percent)
    pub promotion_percent: u64,

    /// Lower clamp of the demotion watermark
    pub min_floor: u64,

    /// Upper clamp of the demotion watermark
    pub min_ceiling: u64,

    /// Lower clamp of the promotion watermark
    pub max_floor: u64,

    /// Upper clamp of the promotion watermark
    pub max_ceiling: u64,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            demotion_percent: 2,
            promotion_percent: 3,
            min_floor: 12_800,
            min_ceiling: 256_000,
            max_floor: 25_600,
            max_ceiling: 384_000,
        }
    }
}

impl WatermarkConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_floor > self.min_ceiling {
            return Err(ConfigError::Message(
                "watermark.min_floor must be <= watermark.min_ceiling".to_string(),
            ));
        }
        if self.max_floor > self.max_ceiling {
            return Err(ConfigError::Message(
                "watermark.max_floor must be <= watermark.max_ceiling".to_string(),
            ));
        }
        if self.demotion_percent > 100 || self.promotion_percent > 100 {
            return Err(ConfigError::Message(
                "watermark percentages must be <= 100".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tiering scheduler configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Sleep between cycles of a tier loop (milliseconds)
    pub cycle_interval_ms: u64,

    /// Sleep when a tier has no registered tenants (milliseconds)
    pub idle_interval_ms: u64,

    /// Hard cap on pages isolated by one cycle
    pub max_pages_per_cycle: u64,

    /// Pages isolated from a list per scan step
    pub scan_chunk: u64,

    /// Per-cycle promotion budget used by the fixed action budget
    pub action_budget_pages: u64,

    /// Pages left behind when excess exceeds what the tenant actually has
    pub demotion_safety_margin_pages: u64,

    /// Slack over the demotion target before file-backed candidates are refused
    pub min_free_pages: u64,

    /// Units re-sorted per cycle after a threshold change
    pub reclassify_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 500,
            idle_interval_ms: 2000,
            max_pages_per_cycle: 4096,
            scan_chunk: 32,
            action_budget_pages: 8,
            demotion_safety_margin_pages: 12_800,
            min_free_pages: 2560,
            reclassify_limit: 4096,
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pages_per_cycle == 0 {
            return Err(ConfigError::Message(
                "scheduler.max_pages_per_cycle must be > 0".to_string(),
            ));
        }
        if self.scan_chunk == 0 {
            return Err(ConfigError::Message(
                "scheduler.scan_chunk must be > 0".to_string(),
            ));
        }
        if self.cycle_interval_ms == 0 {
            return Err(ConfigError::Message(
                "scheduler.cycle_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Get cycle interval as Duration
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }

    /// Get idle interval as Duration
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }
}

/// Per-tenant tier capacities
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TenantConfig {
    /// Human-readable tenant name
    pub name: String,

    /// Capacity in pages per tier, fastest first
    pub tier_capacities: Vec<u64>,

    /// Whether the scheduler may move this tenant's memory
    #[serde(default = "default_true")]
    pub tiering_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl TenantConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.tier_capacities.len() < 2 {
            return Err(ConfigError::Message(format!(
                "tenant `{}` needs at least two tiers",
                self.name
            )));
        }
        if self.tier_capacities.len() > usize::from(u8::MAX) {
            return Err(ConfigError::Message(format!(
                "tenant `{}` has too many tiers",
                self.name
            )));
        }
        Ok(())
    }
}
