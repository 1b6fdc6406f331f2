//! Prometheus metrics recording and background collection.

use metrics::{counter, gauge, histogram};
use spacevec_core::Engine;
use std::path::Path;
use std::time::Duration;

/// Records HTTP request metrics.
pub fn record_request(method: &str, path: &str, status: u16, duration: Duration) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];
    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels).record(duration.as_secs_f64());
}

/// Records a write operation.
pub fn record_write_operation(space: &str, operation: &str) {
    counter!(
        "spacevec_operations_total",
        "space" => space.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Records a search or rerank.
pub fn record_search_operation(space: &str, search_type: &str) {
    counter!(
        "spacevec_search_total",
        "space" => space.to_string(),
        "type" => search_type.to_string()
    )
    .increment(1);
}

/// Records a snapshot operation and its outcome.
pub fn record_snapshot_operation(operation: &str, success: bool) {
    counter!(
        "spacevec_snapshot_total",
        "operation" => operation.to_string(),
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Updates per-space gauges.
pub fn update_space_metrics(engine: &Engine) {
    let spaces = engine.list_spaces();
    gauge!("spacevec_spaces_total").set(spaces.len() as f64);
    for info in spaces {
        let labels = [("space", info.name)];
        gauge!("spacevec_vectors_total", &labels).set(info.vector_count as f64);
        gauge!("spacevec_versions_total", &labels).set(info.version_count as f64);
    }
}

/// Updates the `spacevec_wal_size_bytes` gauge.
pub fn update_wal_metrics(wal_path: &Path) {
    if let Ok(meta) = std::fs::metadata(wal_path) {
        gauge!("spacevec_wal_size_bytes").set(meta.len() as f64);
    }
}
