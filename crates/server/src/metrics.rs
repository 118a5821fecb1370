//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the NexusDrop server:
//! - HTTP request metrics (latency, counts)
//! - Job counts by state and orchestrator status (collected dynamically)
//! - Core download metrics registered from `nexusdrop_core::metrics`

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use regex_lite::Regex;

use nexusdrop_core::JobState;

use crate::state::AppState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "nexusdrop_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("nexusdrop_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "nexusdrop_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Job Metrics (collected dynamically)
// =============================================================================

/// Jobs by current state.
pub static JOBS_BY_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("nexusdrop_jobs_by_state", "Current job count by state"),
        &["state"],
    )
    .unwrap()
});

/// Orchestrator running state (1 = running, 0 = stopped).
pub static ORCHESTRATOR_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "nexusdrop_orchestrator_running",
        "Whether the orchestrator is running (1) or stopped (0)",
    )
    .unwrap()
});

/// Attempts with a live task.
pub static ACTIVE_ATTEMPTS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "nexusdrop_active_attempts",
        "Number of download attempts currently running",
    )
    .unwrap()
});

/// Automatic retries waiting on their timer.
pub static PENDING_RETRIES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "nexusdrop_pending_retries",
        "Number of automatic retries waiting to fire",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Jobs
    registry.register(Box::new(JOBS_BY_STATE.clone())).unwrap();
    registry
        .register(Box::new(ORCHESTRATOR_RUNNING.clone()))
        .unwrap();
    registry.register(Box::new(ACTIVE_ATTEMPTS.clone())).unwrap();
    registry.register(Box::new(PENDING_RETRIES.clone())).unwrap();

    // Core metrics (downloads, retries, lifecycle)
    for metric in nexusdrop_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Refresh gauges from current application state before encoding.
pub fn collect_dynamic_metrics(state: &AppState) {
    let orchestrator = state.orchestrator();
    let status = orchestrator.status();
    ORCHESTRATOR_RUNNING.set(if status.running { 1 } else { 0 });
    ACTIVE_ATTEMPTS.set(status.active_attempts as i64);
    PENDING_RETRIES.set(status.pending_retries as i64);

    let counts = orchestrator.registry().count_by_state();
    for job_state in JobState::all() {
        let count = counts.get(&job_state).copied().unwrap_or(0);
        JOBS_BY_STATE
            .with_label_values(&[job_state.as_str()])
            .set(count as i64);
    }
}

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});
static HASH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[0-9a-fA-F]{40}\b").unwrap());
static JOB_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[0-9a-fA-F]{32}\b").unwrap());
static NUMERIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").unwrap());

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = UUID_RE.replace_all(path, "{id}");
    let result = HASH_RE.replace_all(&result, "{hash}");
    let result = JOB_ID_RE.replace_all(&result, "{id}");
    let result = NUMERIC_RE.replace_all(&result, "/{id}$1");
    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_uuid() {
        let path = "/api/downloads/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_path(path), "/api/downloads/{id}");
    }

    #[test]
    fn test_normalize_path_job_id() {
        let path = "/api/download/550e8400e29b41d4a716446655440000/retry";
        assert_eq!(normalize_path(path), "/api/download/{id}/retry");
    }

    #[test]
    fn test_normalize_path_hash() {
        let path = "/api/resources/a94a8fe5ccb19ba61c4c0873d391e987982fbbd3";
        assert_eq!(normalize_path(path), "/api/resources/{hash}");
    }

    #[test]
    fn test_normalize_path_numeric() {
        let path = "/api/downloads/12345";
        assert_eq!(normalize_path(path), "/api/downloads/{id}");
    }

    #[test]
    fn test_normalize_path_no_ids() {
        let path = "/api/health";
        assert_eq!(normalize_path(path), "/api/health");
    }

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = encode_metrics().unwrap();
        assert!(output.contains("nexusdrop_http_requests_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_registry_contains_all_metrics() {
        HTTP_REQUEST_DURATION
            .with_label_values(&["GET", "/test", "200"])
            .observe(0.1);
        HTTP_REQUESTS_IN_FLIGHT.set(0);
        JOBS_BY_STATE.with_label_values(&["pending"]).set(0);
        ORCHESTRATOR_RUNNING.set(0);
        ACTIVE_ATTEMPTS.set(0);
        nexusdrop_core::metrics::RETRIES_TOTAL
            .with_label_values(&["manual"])
            .inc();

        let output = encode_metrics().unwrap();

        assert!(output.contains("nexusdrop_http_request_duration_seconds"));
        assert!(output.contains("nexusdrop_http_requests_in_flight"));
        assert!(output.contains("nexusdrop_jobs_by_state"));
        assert!(output.contains("nexusdrop_orchestrator_running"));
        assert!(output.contains("nexusdrop_active_attempts"));
        assert!(output.contains("nexusdrop_retries_total"));
    }
}
