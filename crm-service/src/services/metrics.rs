//! Prometheus metrics for crm-service.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Recorder for the HTTP middleware metrics emitted through the `metrics` facade.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Invoices created.
pub static INVOICES_CREATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("crm_invoices_created_total", "Total number of invoices created")
        .expect("Failed to register invoices_created_total")
});

/// Reconciliation attempts by signal source and outcome.
pub static RECONCILIATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "crm_reconciliations_total",
        "Total number of payment reconciliations",
        &["source", "outcome"] // reconciled, already_paid, not_found, failed
    )
    .expect("Failed to register reconciliations_total")
});

/// Webhook events by type and handling result.
pub static WEBHOOK_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "crm_webhook_events_total",
        "Total number of provider webhook events",
        &["event_type", "result"]
    )
    .expect("Failed to register webhook_events_total")
});

/// Notifications that could not be delivered to an observer.
pub static NOTIFICATIONS_DROPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "crm_notifications_dropped_total",
        "Total number of notifications dropped for closed observers"
    )
    .expect("Failed to register notifications_dropped_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "crm_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Install the HTTP recorder and force registration of the domain metrics.
///
/// Safe to call more than once; only the first call installs the recorder.
pub fn init_metrics() {
    if METRICS_HANDLE.get().is_none() {
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = METRICS_HANDLE.set(handle);
            }
            Err(e) => tracing::warn!(error = %e, "Prometheus recorder not installed"),
        }
    }

    Lazy::force(&INVOICES_CREATED_TOTAL);
    Lazy::force(&RECONCILIATIONS_TOTAL);
    Lazy::force(&WEBHOOK_EVENTS_TOTAL);
    Lazy::force(&NOTIFICATIONS_DROPPED_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_default();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    output.push_str(&encoder.encode_to_string(&metric_families).unwrap_or_default());

    output
}

pub fn record_reconciliation(source: &str, outcome: &str) {
    RECONCILIATIONS_TOTAL
        .with_label_values(&[source, outcome])
        .inc();
}

pub fn record_webhook_event(event_type: &str, result: &str) {
    WEBHOOK_EVENTS_TOTAL
        .with_label_values(&[event_type, result])
        .inc();
}
