//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Retry and liveness policy for download jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Automatic retries allowed before a job stays in ERROR.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between a failed attempt and its automatic retry (milliseconds).
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// A DOWNLOADING job older than this is considered stuck (milliseconds).
    #[serde(default = "default_stuck_timeout")]
    pub stuck_timeout_ms: u64,

    /// Measure stuck time from the last progress event instead of the
    /// attempt start.
    #[serde(default)]
    pub stuck_from_last_progress: bool,

    /// Maximum concurrent downloads (0 = unlimited).
    /// When the limit is reached, new attempts wait until a slot is free.
    #[serde(default)]
    pub max_concurrent_downloads: usize,

    /// TTL applied when a create request does not name one.
    #[serde(default = "default_ttl_hours")]
    pub default_ttl_hours: f64,
}

fn default_max_retries() -> u32 {
    7
}

fn default_retry_delay() -> u64 {
    1000 // 1 second
}

fn default_stuck_timeout() -> u64 {
    60_000 // 1 minute
}

fn default_ttl_hours() -> f64 {
    72.0
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            stuck_timeout_ms: default_stuck_timeout(),
            stuck_from_last_progress: false,
            max_concurrent_downloads: 0,
            default_ttl_hours: default_ttl_hours(),
        }
    }
}
