//! Prometheus metrics for the ACH gateway.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge_vec, CounterVec,
    HistogramVec, IntGaugeVec, TextEncoder,
};

/// SQLite connection pool states, sampled every second.
pub static SQLITE_CONNECTIONS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "sqlite_connections",
        "How many sqlite connections and what status they're in",
        &["state"] // idle, in_use, open
    )
    .expect("Failed to register sqlite_connections")
});

/// Merged ACH files uploaded to remote hosts.
pub static FILES_UPLOADED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ach_files_uploaded_total",
        "Merged ACH files uploaded, by destination routing number",
        &["destination"]
    )
    .expect("Failed to register ach_files_uploaded_total")
});

/// Inbound and return files pulled down from remote hosts.
pub static FILES_DOWNLOADED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ach_files_downloaded_total",
        "Remote ACH files downloaded, by kind",
        &["kind"] // inbound, return
    )
    .expect("Failed to register ach_files_downloaded_total")
});

/// Transfers merged into an outgoing ACH file.
pub static TRANSFERS_MERGED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ach_transfers_merged_total",
        "Transfers merged into outgoing ACH files, by destination",
        &["destination"]
    )
    .expect("Failed to register ach_transfers_merged_total")
});

/// Cursor rows skipped because a referenced depository was missing.
pub static TRANSFERS_SKIPPED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ach_transfers_skipped_total",
        "Transfers skipped during cursor iteration, by reason",
        &["reason"]
    )
    .expect("Failed to register ach_transfers_skipped_total")
});

/// Return entries matched back to an originating transfer.
pub static RETURNS_PROCESSED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ach_returns_processed_total",
        "Return entries reconciled against transfers, by return code",
        &["code"]
    )
    .expect("Failed to register ach_returns_processed_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ach_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register ach_db_query_duration_seconds")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&SQLITE_CONNECTIONS);
    Lazy::force(&FILES_UPLOADED);
    Lazy::force(&FILES_DOWNLOADED);
    Lazy::force(&TRANSFERS_MERGED);
    Lazy::force(&TRANSFERS_SKIPPED);
    Lazy::force(&RETURNS_PROCESSED);
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
