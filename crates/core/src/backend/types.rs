//! Backend contract shared by all transports.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::job::{Job, ProgressUpdate};

/// Receives progress events for one attempt. Not backpressured; may be
/// called at any rate.
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Why a fetch attempt failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("A torrent with the same id is already being downloaded ({0})")]
    DuplicateActiveResource(String),

    #[error("Server responded with HTTP {0}")]
    HttpStatus(u16),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Download incomplete: received {received} of {expected} bytes")]
    Incomplete { expected: u64, received: u64 },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Swarm error: {0}")]
    Swarm(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The attempt was superseded or the job is going away.
    #[error("Download cancelled")]
    Cancelled,
}

impl FetchError {
    /// Transient failures are retried automatically; the rest land in ERROR
    /// until an owner retries.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            FetchError::DuplicateActiveResource(_)
                | FetchError::Unsupported(_)
                | FetchError::Cancelled
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// A transport able to fetch a job's artifact to disk.
#[async_trait]
pub trait DownloadBackend: Send + Sync {
    /// Backend name for logging and metrics.
    fn name(&self) -> &str;

    /// Fetch the job's artifact, reporting progress through `on_progress`.
    /// Resolves exactly once.
    ///
    /// Once `cancel` fires the backend stops touching the artifact and
    /// returns [`FetchError::Cancelled`] with every started write finished.
    async fn start_download(
        &self,
        job: &Job,
        on_progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<(), FetchError>;

    /// Release transport resources held for a job that is being deleted or
    /// abandoned. Best-effort.
    async fn cancel(&self, _job: &Job) {}
}
