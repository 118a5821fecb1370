//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Orchestrator (attempts, completions, failures, retries)
//! - Peer transport (duplicate resource rejections)
//! - Lifecycle sweeper (stuck jobs, expiry, reconciliation)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Orchestrator - Download Metrics
// =============================================================================

/// Download attempts started, by transport.
pub static DOWNLOADS_STARTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("nexusdrop_downloads_started_total", "Total download attempts started"),
        &["transport"], // "http", "torrent"
    )
    .unwrap()
});

/// Downloads completed, by transport.
pub static DOWNLOADS_COMPLETED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "nexusdrop_downloads_completed_total",
            "Total downloads completed successfully",
        ),
        &["transport"],
    )
    .unwrap()
});

/// Failed attempts, by transport and whether they will be retried.
pub static DOWNLOADS_FAILED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("nexusdrop_downloads_failed_total", "Total failed download attempts"),
        &["transport", "kind"], // kind: "transient", "permanent"
    )
    .unwrap()
});

/// Duration of successful attempts in seconds.
pub static DOWNLOAD_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "nexusdrop_download_duration_seconds",
            "Duration of successful download attempts",
        )
        .buckets(vec![
            1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0,
        ]),
        &["transport"],
    )
    .unwrap()
});

/// Retries by trigger.
pub static RETRIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("nexusdrop_retries_total", "Total download retries"),
        &["trigger"], // "failure", "timeout", "manual"
    )
    .unwrap()
});

// =============================================================================
// Peer Transport Metrics
// =============================================================================

/// Peer fetches rejected because the resource was already active.
pub static DUPLICATE_REJECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "nexusdrop_duplicate_resource_rejections_total",
        "Peer fetches rejected because another job holds the resource",
    )
    .unwrap()
});

// =============================================================================
// Lifecycle Metrics
// =============================================================================

/// Jobs detected as stuck.
pub static STUCK_DETECTIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "nexusdrop_stuck_detections_total",
        "Total downloads detected as stuck",
    )
    .unwrap()
});

/// Jobs removed by the expiry sweep.
pub static JOBS_EXPIRED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("nexusdrop_jobs_expired_total", "Total jobs removed after expiry").unwrap()
});

/// Reconciliation actions by kind.
pub static RECONCILED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "nexusdrop_reconciled_total",
            "Registry/filesystem discrepancies repaired",
        ),
        &["kind"], // "orphan_file", "orphan_staging", "missing_artifact"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Downloads
        Box::new(DOWNLOADS_STARTED.clone()),
        Box::new(DOWNLOADS_COMPLETED.clone()),
        Box::new(DOWNLOADS_FAILED.clone()),
        Box::new(DOWNLOAD_DURATION.clone()),
        Box::new(RETRIES_TOTAL.clone()),
        // Peer transport
        Box::new(DUPLICATE_REJECTIONS_TOTAL.clone()),
        // Lifecycle
        Box::new(STUCK_DETECTIONS.clone()),
        Box::new(JOBS_EXPIRED.clone()),
        Box::new(RECONCILED_TOTAL.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }
        RETRIES_TOTAL.with_label_values(&["manual"]).inc();
        assert!(!registry.gather().is_empty());
    }
}
