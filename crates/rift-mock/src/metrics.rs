//! Prometheus metrics for the resolution engine.
//!
//! Tracks resolution outcomes, script execution and the compiled-script
//! caches.
use crate::cache::CacheMetrics;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    /// Requests resolved, by outcome
    pub static ref RESOLUTIONS_TOTAL: CounterVec = register_counter_vec!(
        "rift_mock_resolutions_total",
        "Total number of requests resolved by the mock engine",
        &["method", "outcome"]  // outcome: default|immediate|not_found|rejected|error
    )
    .unwrap();

    /// Script execution duration
    pub static ref SCRIPT_EXECUTION_DURATION_MS: HistogramVec = register_histogram_vec!(
        "rift_mock_script_execution_duration_ms",
        "Histogram of script execution time in milliseconds",
        &["engine", "result"],  // result: ok|error
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0]
    )
    .unwrap();

    /// Script failures
    pub static ref SCRIPT_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "rift_mock_script_errors_total",
        "Total number of script failures",
        &["engine", "error_type"]  // error_type: load|compile|runtime|behaviour|config
    )
    .unwrap();

    /// Compiled-script cache counters, mirrored from each engine's cache
    pub static ref SCRIPT_CACHE: GaugeVec = register_gauge_vec!(
        "rift_mock_script_cache",
        "Compiled script cache statistics per engine",
        &["engine", "stat"]  // stat: hits|misses|evictions|expirations|size
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_resolution(method: &str, outcome: &str) {
    RESOLUTIONS_TOTAL.with_label_values(&[method, outcome]).inc();
}

pub fn record_script_execution(engine: &str, duration_ms: f64, ok: bool) {
    let result = if ok { "ok" } else { "error" };
    SCRIPT_EXECUTION_DURATION_MS
        .with_label_values(&[engine, result])
        .observe(duration_ms);
}

pub fn record_script_error(engine: &str, error_type: &str) {
    SCRIPT_ERRORS_TOTAL
        .with_label_values(&[engine, error_type])
        .inc();
}

pub fn update_script_cache(engine: &str, metrics: &CacheMetrics) {
    let stats = [
        ("hits", metrics.hits as f64),
        ("misses", metrics.misses as f64),
        ("evictions", metrics.evictions as f64),
        ("expirations", metrics.expirations as f64),
        ("size", metrics.size as f64),
    ];
    for (stat, value) in stats {
        SCRIPT_CACHE.with_label_values(&[engine, stat]).set(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_collect() {
        record_resolution("GET", "default");
        record_script_execution("rhai", 1.5, true);
        record_script_error("rhai", "compile");
        update_script_cache(
            "rhai",
            &CacheMetrics {
                hits: 3,
                misses: 1,
                ..Default::default()
            },
        );

        let output = collect_metrics();
        assert!(output.contains("rift_mock_resolutions_total"));
        assert!(output.contains("rift_mock_script_execution_duration_ms"));
        assert!(output.contains("rift_mock_script_errors_total"));
        assert!(output.contains("rift_mock_script_cache"));
    }

    #[test]
    fn test_script_cache_gauge_values() {
        update_script_cache(
            "metrics-test",
            &CacheMetrics {
                evictions: 4,
                size: 2,
                ..Default::default()
            },
        );
        assert_eq!(
            SCRIPT_CACHE
                .with_label_values(&["metrics-test", "evictions"])
                .get(),
            4.0
        );
        assert_eq!(
            SCRIPT_CACHE.with_label_values(&["metrics-test", "size"]).get(),
            2.0
        );
    }
}
