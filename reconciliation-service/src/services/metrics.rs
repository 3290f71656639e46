//! Prometheus metrics for reconciliation-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, CounterVec, Encoder,
    HistogramVec, IntCounter, TextEncoder,
};

/// Counter for tasks reaching a status.
pub static TASKS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_tasks_total",
        "Total number of reconciliation tasks by status",
        &["status"]
    )
    .expect("Failed to register TASKS")
});

/// Histogram for task run time, labelled by terminal status.
pub static TASK_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "reconciliation_task_duration_seconds",
        "Reconciliation task run time in seconds",
        &["status"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]
    )
    .expect("Failed to register TASK_DURATION")
});

/// Counter for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "reconciliation_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for committed matches by method (manual, auto, suggestion).
pub static MATCHES_COMMITTED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_matches_committed_total",
        "Total number of committed matches",
        &["method"]
    )
    .expect("Failed to register MATCHES_COMMITTED")
});

/// Counter for auto-match candidates skipped as ambiguous or lost races.
pub static AUTO_MATCH_SKIPPED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "reconciliation_auto_match_skipped_total",
        "Auto-match candidates skipped as ambiguous or already claimed"
    )
    .expect("Failed to register AUTO_MATCH_SKIPPED")
});

/// Counter for scored candidates.
pub static CANDIDATES_EVALUATED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "reconciliation_candidates_evaluated_total",
        "Total number of candidate groups scored"
    )
    .expect("Failed to register CANDIDATES_EVALUATED")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&TASKS);
    Lazy::force(&TASK_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&MATCHES_COMMITTED);
    Lazy::force(&AUTO_MATCH_SKIPPED);
    Lazy::force(&CANDIDATES_EVALUATED);
    Lazy::force(&ERRORS);
    Lazy::force(&service_core::middleware::metrics::HTTP_REQUESTS);
    Lazy::force(&service_core::middleware::metrics::HTTP_REQUEST_DURATION);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Record a task reaching `status`.
pub fn record_task(status: &str) {
    TASKS.with_label_values(&[status]).inc();
}

/// Record how long a finished task ran.
pub fn record_task_duration(status: &str, duration_secs: f64) {
    TASK_DURATION
        .with_label_values(&[status])
        .observe(duration_secs);
}

/// Record committed matches.
pub fn record_matches(method: &str, count: usize) {
    MATCHES_COMMITTED
        .with_label_values(&[method])
        .inc_by(count as f64);
}

pub fn record_auto_match_skipped(count: u64) {
    AUTO_MATCH_SKIPPED.inc_by(count);
}

pub fn record_candidates_evaluated(count: u64) {
    CANDIDATES_EVALUATED.inc_by(count);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
