use lazy_static::lazy_static;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Once;

static INIT: Once = Once::new();

lazy_static! {
    /// Global Prometheus metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Routing Metrics
    // ============================================================================

    /// Routing decisions by match type (exact, partial, base, sampled)
    pub static ref ROUTING_DECISIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("viewhouse_routing_decisions_total", "Routing decisions by match type"),
        &["match_type"]
    ).expect("metric can be created");

    /// Plan completions by status
    pub static ref PLAN_STATUS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("viewhouse_plan_status_total", "Plan completions by status"),
        &["status"]
    ).expect("metric can be created");

    /// In-engine compute time per plan, milliseconds
    pub static ref PLAN_COMPUTE_MS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("viewhouse_plan_compute_ms", "Plan compute time in milliseconds")
            .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 30000.0]),
        &["source_kind"] // view | base
    ).expect("metric can be created");

    /// Result serialization time per plan, milliseconds
    pub static ref PLAN_IO_MS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("viewhouse_plan_io_ms", "Result write time in milliseconds")
            .buckets(vec![0.5, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]),
        &["source_kind"]
    ).expect("metric can be created");

    /// Plans aborted by the memory budget
    pub static ref MEMORY_ABORTS_TOTAL: IntCounter = IntCounter::new(
        "viewhouse_memory_aborts_total",
        "Plans aborted by the batch memory budget"
    ).expect("metric can be created");

    // ============================================================================
    // Builder Metrics
    // ============================================================================

    /// View build durations
    pub static ref BUILD_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("viewhouse_build_duration_seconds", "View build duration in seconds")
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
        &["view"]
    ).expect("metric can be created");

    /// Failed builds by reason (drift, sanity, engine, timeout)
    pub static ref BUILD_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("viewhouse_build_failures_total", "Failed view builds"),
        &["view", "reason"]
    ).expect("metric can be created");

    // ============================================================================
    // Validation Metrics
    // ============================================================================

    /// Validator mismatches per view
    pub static ref VALIDATION_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("viewhouse_validation_failures_total", "Validator mismatches per view"),
        &["view"]
    ).expect("metric can be created");

    /// Quarantine transitions per view
    pub static ref QUARANTINES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("viewhouse_quarantines_total", "Views moved to QUARANTINED"),
        &["view"]
    ).expect("metric can be created");

    /// Currently healthy views
    pub static ref HEALTHY_VIEWS: IntGauge = IntGauge::new(
        "viewhouse_healthy_views",
        "Number of views currently HEALTHY"
    ).expect("metric can be created");
}

/// Register all metrics with the global registry. Idempotent.
pub fn init() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(ROUTING_DECISIONS_TOTAL.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(PLAN_STATUS_TOTAL.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(PLAN_COMPUTE_MS.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(PLAN_IO_MS.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(MEMORY_ABORTS_TOTAL.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(BUILD_DURATION_SECONDS.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(BUILD_FAILURES_TOTAL.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(VALIDATION_FAILURES_TOTAL.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(QUARANTINES_TOTAL.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(HEALTHY_VIEWS.clone()))
            .expect("collector can be registered");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        ROUTING_DECISIONS_TOTAL.with_label_values(&["exact"]).inc();
        assert!(ROUTING_DECISIONS_TOTAL.with_label_values(&["exact"]).get() >= 1);
    }
}
