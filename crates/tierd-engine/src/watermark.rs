//! Watermark Calculator: reserved headroom for a tier from its capacity.

use tierd_core::WatermarkConfig;

/// Pure watermark functions with configurable clamps.
#[derive(Debug, Clone)]
pub struct WatermarkCalculator {
    config: WatermarkConfig,
}

impl WatermarkCalculator {
    /// Create a calculator from clamp configuration
    #[must_use]
    pub fn new(config: WatermarkConfig) -> Self {
        Self { config }
    }

    /// Free space demotion always drains toward on the fast tier.
    #[must_use]
    pub fn demotion_watermark(&self, capacity: u64) -> u64 {
        let raw = capacity.saturating_mul(self.config.demotion_percent) / 100;
        raw.clamp(self.config.min_floor, self.config.min_ceiling)
    }

    /// Reserve promotion leaves unfilled on the fast tier.
    #[must_use]
    pub fn promotion_watermark(&self, capacity: u64) -> u64 {
        let raw = capacity.saturating_mul(self.config.promotion_percent) / 100;
        raw.clamp(self.config.max_floor, self.config.max_ceiling)
    }

    /// Capacity the hottest pages may occupy once the promotion reserve is kept free.
    #[must_use]
    pub fn available_for_hot(&self, capacity: u64) -> u64 {
        capacity.saturating_sub(self.promotion_watermark(capacity))
    }
}

impl Default for WatermarkCalculator {
    fn default() -> Self {
        Self::new(WatermarkConfig::default())
    }
}
