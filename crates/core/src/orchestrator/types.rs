//! Types for the download orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::RegistryError;

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Caller supplied an unusable request.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Job not found.
    #[error("download not found: {0}")]
    NotFound(String),

    /// Owner token does not match.
    #[error("not authorized for download: {0}")]
    Unauthorized(String),

    /// Invalid job state for operation.
    #[error("invalid download state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Registry error.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Request to create a download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDownload {
    pub url: String,
    /// Hours until the job and its artifact expire.
    pub ttl_hours: Option<f64>,
}

/// Returned once at creation; the owner token is never shown again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedDownload {
    pub id: String,
    pub owner_token: String,
    pub expires_at: DateTime<Utc>,
}

/// What caused a new attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTrigger {
    /// Automatic retry after a failed attempt.
    Failure,
    /// Restart of an attempt exceeding the stuck timeout.
    Timeout,
    /// Owner-requested retry.
    Manual,
}

impl RetryTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryTrigger::Failure => "failure",
            RetryTrigger::Timeout => "timeout",
            RetryTrigger::Manual => "manual",
        }
    }
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Whether the orchestrator is running.
    pub running: bool,
    /// Attempts with a live task.
    pub active_attempts: usize,
    /// Automatic retries waiting on their timer.
    pub pending_retries: usize,
}
