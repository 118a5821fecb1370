//! Download backend driven by a script of outcomes.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::backend::{DownloadBackend, FetchError, ProgressCallback};
use crate::job::{Job, ProgressUpdate};
use crate::storage::StorageLayout;

/// How a single scripted attempt ends.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Report 100% and succeed.
    Complete,
    /// Sleep, then behave like `Complete`.
    CompleteAfter(Duration),
    /// Fail with a retryable network error.
    Fail(String),
    /// Fail because another job holds the resource.
    Duplicate(String),
    /// Report some progress, then wait until cancelled.
    Hang,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Backend whose attempts follow queued outcomes, then a default.
///
/// # Example
///
/// ```rust,ignore
/// let backend = ScriptedBackend::new("http");
/// backend.push(ScriptedOutcome::Fail("reset".into()));
/// backend.set_default(ScriptedOutcome::Complete);
/// // First attempt fails, every later one completes.
/// ```
#[derive(Debug)]
pub struct ScriptedBackend {
    name: String,
    script: Mutex<VecDeque<ScriptedOutcome>>,
    default: Mutex<ScriptedOutcome>,
    calls: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
    storage: Option<StorageLayout>,
}

impl ScriptedBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            default: Mutex::new(ScriptedOutcome::Complete),
            calls: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            storage: None,
        }
    }

    /// Write a small artifact on completion so it exists on disk.
    pub fn with_storage(mut self, storage: StorageLayout) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Queue an outcome for the next unscripted attempt.
    pub fn push(&self, outcome: ScriptedOutcome) {
        lock(&self.script).push_back(outcome);
    }

    /// Outcome used once the queue is empty.
    pub fn set_default(&self, outcome: ScriptedOutcome) {
        *lock(&self.default) = outcome;
    }

    /// Job ids in the order attempts started.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, job_id: &str) -> usize {
        lock(&self.calls).iter().filter(|id| *id == job_id).count()
    }

    /// Job ids passed to `cancel`.
    pub fn cancelled(&self) -> Vec<String> {
        lock(&self.cancelled).clone()
    }

    fn next_outcome(&self) -> ScriptedOutcome {
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| lock(&self.default).clone())
    }

    async fn finish(&self, job: &Job, on_progress: &ProgressCallback) -> Result<(), FetchError> {
        const BODY: &[u8] = b"scripted artifact";
        if let Some(storage) = &self.storage {
            tokio::fs::write(storage.artifact_path(job), BODY).await?;
        }
        on_progress(ProgressUpdate {
            downloaded_bytes: BODY.len() as u64,
            total_bytes: Some(BODY.len() as u64),
            progress_percent: 100.0,
            ..Default::default()
        });
        Ok(())
    }
}

#[async_trait]
impl DownloadBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start_download(
        &self,
        job: &Job,
        on_progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<(), FetchError> {
        lock(&self.calls).push(job.id.clone());

        match self.next_outcome() {
            ScriptedOutcome::Complete => self.finish(job, &on_progress).await,
            ScriptedOutcome::CompleteAfter(delay) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(FetchError::Cancelled),
                    _ = tokio::time::sleep(delay) => self.finish(job, &on_progress).await,
                }
            }
            ScriptedOutcome::Fail(message) => Err(FetchError::Network(message)),
            ScriptedOutcome::Duplicate(resource) => {
                Err(FetchError::DuplicateActiveResource(resource))
            }
            ScriptedOutcome::Hang => {
                on_progress(ProgressUpdate {
                    downloaded_bytes: 1,
                    progress_percent: 1.0,
                    ..Default::default()
                });
                cancel.cancelled().await;
                Err(FetchError::Cancelled)
            }
        }
    }

    async fn cancel(&self, job: &Job) {
        lock(&self.cancelled).push(job.id.clone());
    }
}
