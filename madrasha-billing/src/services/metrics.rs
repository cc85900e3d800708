//! Prometheus metrics for madrasha-billing.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter_vec, CounterVec,
    HistogramVec, IntCounterVec, TextEncoder,
};

/// HTTP request counter by method, matched route and status.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "madrasha_http_requests_total",
        "Total number of HTTP requests",
        &["method", "route", "status"]
    )
    .expect("Failed to register http_requests_total")
});

/// HTTP request duration histogram by method and matched route.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "madrasha_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "route"],
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register http_request_duration")
});

/// Invoice generator outcomes (created, updated, skipped, existed, failed).
pub static INVOICES_GENERATED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "madrasha_invoices_generated_total",
        "Per-student results of invoice generation runs",
        &["outcome"]
    )
    .expect("Failed to register invoices_generated_total")
});

/// Gateway callbacks by kind (success, fail, cancel, ipn) and result.
pub static CALLBACKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "madrasha_payment_callbacks_total",
        "Payment gateway callbacks by kind and result",
        &["kind", "result"]
    )
    .expect("Failed to register payment_callbacks_total")
});

/// Money credited or debited per fund (no student labels to keep cardinality flat).
pub static LEDGER_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "madrasha_ledger_amount_total",
        "Sum of ledger entry amounts by fund and direction",
        &["fund", "direction"]
    )
    .expect("Failed to register ledger_amount_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "madrasha_errors_total",
        "Total number of errors by type",
        &["error_type", "operation"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "madrasha_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS_TOTAL);
    Lazy::force(&HTTP_REQUEST_DURATION);
    Lazy::force(&INVOICES_GENERATED_TOTAL);
    Lazy::force(&CALLBACKS_TOTAL);
    Lazy::force(&LEDGER_AMOUNT_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

pub fn record_generation_outcome(outcome: &str, count: u32) {
    if count > 0 {
        INVOICES_GENERATED_TOTAL
            .with_label_values(&[outcome])
            .inc_by(u64::from(count));
    }
}

pub fn record_callback(kind: &str, result: &str) {
    CALLBACKS_TOTAL.with_label_values(&[kind, result]).inc();
}

pub fn record_ledger_amount(fund: &str, direction: &str, amount: f64) {
    LEDGER_AMOUNT_TOTAL
        .with_label_values(&[fund, direction])
        .inc_by(amount.abs());
}

pub fn record_error(error_type: &str, operation: &str) {
    ERRORS_TOTAL
        .with_label_values(&[error_type, operation])
        .inc();
}
