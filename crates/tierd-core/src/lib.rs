//! Core types shared by the tierd accounting engine and its tools.

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;

pub use config::{
    AccountingConfig, AdaptationConfig, SchedulerConfig, SplitConfig, TenantConfig, TierdConfig,
    WatermarkConfig, MAX_BUCKET, MAX_SKEW_BUCKET,
};
pub use error::{CoreError, CoreResult};
pub use ids::{TenantId, TierId, UnitAddress, BASE_UNIT_SHIFT, LARGE_UNIT_SHIFT, SUBUNITS_PER_LARGE};
