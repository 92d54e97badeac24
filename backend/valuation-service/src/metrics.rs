/// Prometheus metrics for the valuation pipeline
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::path::Path;

pub static EVENTS_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "valuation_events_processed_total",
        "Listing events that reached a final outcome",
        &["outcome"]
    )
    .expect("Failed to register events processed metric")
});

pub static DEAD_LETTERS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "valuation_dead_letters_total",
        "Entries recorded in the dead-letter sink",
        &["kind"]
    )
    .expect("Failed to register dead letters metric")
});

pub static PREDICTOR_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "valuation_predictor_calls_total",
        "Calls made to the predictor",
        &["result"]
    )
    .expect("Failed to register predictor calls metric")
});

pub static PREDICTOR_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "valuation_predictor_latency_seconds",
        "Predictor call latency, timeouts included",
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register predictor latency metric")
});

pub static CACHE_LOOKUPS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "valuation_cache_lookups_total",
        "Prediction cache lookups",
        &["result"]
    )
    .expect("Failed to register cache lookups metric")
});

pub static CACHE_EVICTIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "valuation_cache_evictions_total",
        "Entries evicted from the prediction cache to make room"
    )
    .expect("Failed to register cache evictions metric")
});

pub static IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "valuation_events_in_flight",
        "Records held by the consumer loop"
    )
    .expect("Failed to register in-flight metric")
});

pub static OFFSET_COMMITS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "valuation_offset_commits_total",
        "Offset commit attempts",
        &["result"]
    )
    .expect("Failed to register offset commits metric")
});

pub static PUBLISH_RESULTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "valuation_listing_publish_total",
        "Listing events published by the producer",
        &["result"]
    )
    .expect("Failed to register publish metric")
});

/// Current values in the Prometheus text exposition format
pub fn render() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }

    String::from_utf8_lossy(&buffer).into_owned()
}

/// Write a snapshot for the node_exporter textfile collector.
///
/// Written to a temporary file first so the collector never reads a partial file.
pub async fn write_textfile(path: &Path) -> std::io::Result<()> {
    let tmp = path.with_extension("prom.tmp");
    tokio::fs::write(&tmp, render()).await?;
    tokio::fs::rename(&tmp, path).await
}
