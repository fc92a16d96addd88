//! Central metrics registry and metric definitions
//!
//! Prometheus metrics for the accounting engine and the tiering scheduler.
//! Metrics are registered lazily on first access using once_cell::Lazy.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    HistogramVec, IntCounter, IntCounterVec, IntGaugeVec,
};

// ===== Accounting Metrics =====

/// Access samples processed, by access kind and whether the unit was tracked
pub static SAMPLES_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tierd_samples_processed_total",
        "Total number of access samples processed",
        &["kind", "tracked"]
    )
    .expect("Failed to register samples counter")
});

/// Tenant decay events, split by whether the histogram reset was deferred
pub static DECAY_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tierd_decay_events_total",
        "Total number of tenant decay events",
        &["reset"]
    )
    .expect("Failed to register decay counter")
});

/// Current hot threshold bucket per tenant
pub static HOT_THRESHOLD: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "tierd_hot_threshold_bucket",
        "Current hot threshold bucket",
        &["tenant", "kind"]
    )
    .expect("Failed to register threshold gauge")
});

/// Threshold adaptation runs
pub static ADAPTATIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tierd_adaptations_total",
        "Total number of threshold adaptation passes"
    )
    .expect("Failed to register adaptation counter")
});

// ===== Scheduler Metrics =====

/// Pages migrated by direction and outcome
pub static MIGRATED_PAGES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tierd_migrated_pages_total",
        "Total number of pages handed to the migration executor",
        &["direction", "status"]
    )
    .expect("Failed to register migration counter")
});

/// Split advisor decisions by outcome
pub static SPLIT_DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tierd_split_decisions_total",
        "Total number of split advisor decisions",
        &["outcome"]
    )
    .expect("Failed to register split counter")
});

/// Scheduler cycle duration
pub static CYCLE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "tierd_cycle_duration_seconds",
        "Tiering scheduler cycle duration in seconds",
        &["tier"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
    )
    .expect("Failed to register cycle duration histogram")
});

/// Force registration of all metrics (call once at startup)
pub fn init() {
    Lazy::force(&SAMPLES_PROCESSED);
    Lazy::force(&DECAY_EVENTS);
    Lazy::force(&HOT_THRESHOLD);
    Lazy::force(&ADAPTATIONS);
    Lazy::force(&MIGRATED_PAGES);
    Lazy::force(&SPLIT_DECISIONS);
    Lazy::force(&CYCLE_DURATION);
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_text() -> String {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_render() {
        init();
        MIGRATED_PAGES.with_label_values(&["promote", "ok"]).inc_by(3);
        let text = gather_text();
        assert!(text.contains("tierd_migrated_pages_total"));
    }
}
