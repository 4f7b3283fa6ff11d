//! Prometheus metric definitions
//!
//! Registered lazily on first access. These mirror what the engine does for
//! external scraping; pass/fail decisions never read them.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

/// Operations executed by kind and result (`ok` / `error`)
pub static OPERATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "surge_operations_total",
        "Total number of operations executed against the target",
        &["operation", "result"]
    )
    .expect("Failed to register operations counter")
});

/// Operation duration histogram
pub static OPERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "surge_operation_duration_seconds",
        "Operation duration in seconds as reported by the transport",
        &["operation"],
        // Buckets: 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register operation duration histogram")
});

/// Per-call check results by check name and result (`pass` / `fail`)
pub static CHECKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "surge_checks_total",
        "Per-call assertion results",
        &["check", "result"]
    )
    .expect("Failed to register checks counter")
});

/// Health checks by result (`healthy` / `unhealthy`)
pub static HEALTH_CHECKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "surge_health_checks_total",
        "Health checks issued against the target",
        &["result"]
    )
    .expect("Failed to register health checks counter")
});

/// Virtual users the load profile currently asks for
pub static TARGET_VUS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("surge_target_vus", "Target virtual-user concurrency")
        .expect("Failed to register target VUs gauge")
});

/// Virtual users currently running iteration loops
pub static ACTIVE_VUS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("surge_active_vus", "Active virtual-user iteration loops")
        .expect("Failed to register active VUs gauge")
});

/// Render every registered metric in the Prometheus text format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
