//! Prometheus metrics for billing-docs-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Documents created by type.
pub static DOCUMENTS_CREATED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_docs_documents_created_total",
        "Total number of documents created by type",
        &["document_type"] // invoice, quote
    )
    .expect("Failed to register documents_created_total")
});

/// Numbers handed out by the sequence allocator.
pub static NUMBERS_ALLOCATED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_docs_numbers_allocated_total",
        "Total number of document numbers allocated",
        &["document_type"]
    )
    .expect("Failed to register numbers_allocated_total")
});

/// Allocation or number collisions that forced a retry or a 409.
pub static ALLOCATION_CONFLICTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_docs_allocation_conflicts_total",
        "Total number of numbering conflicts",
        &["document_type", "outcome"] // retried, surfaced
    )
    .expect("Failed to register allocation_conflicts_total")
});

/// Payments by method.
pub static PAYMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_docs_payments_total",
        "Total number of payments registered by method",
        &["method"]
    )
    .expect("Failed to register payments_total")
});

/// Signature workflow events.
pub static SIGNATURE_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_docs_signature_events_total",
        "Total number of signature workflow events",
        &["event"] // requested, viewed, signed, expired, cancelled
    )
    .expect("Failed to register signature_events_total")
});

/// Notification delivery outcomes.
pub static NOTIFICATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_docs_notifications_total",
        "Total number of notifications by kind and outcome",
        &["kind", "outcome"]
    )
    .expect("Failed to register notifications_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_docs_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "billing_docs_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DOCUMENTS_CREATED_TOTAL);
    Lazy::force(&NUMBERS_ALLOCATED_TOTAL);
    Lazy::force(&ALLOCATION_CONFLICTS_TOTAL);
    Lazy::force(&PAYMENTS_TOTAL);
    Lazy::force(&SIGNATURE_EVENTS_TOTAL);
    Lazy::force(&NOTIFICATIONS_TOTAL);
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
