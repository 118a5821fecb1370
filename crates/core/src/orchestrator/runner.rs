//! Download orchestrator implementation.
//!
//! Drives jobs through the state machine:
//! - Creation: classify transport, resolve names, insert PENDING, launch
//! - Attempts: one live task per job, tagged with an attempt generation
//! - Failures: retryable errors re-launch through the retry queue

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::backend::{DownloadBackend, FetchError, ProgressCallback};
use crate::job::{
    compose_filename, generate_job_id, generate_owner_token, generate_tag, tokens_match, Job,
    JobState, NewJob,
};
use crate::metrics;
use crate::registry::JobRegistry;
use crate::resolver::{choose_filename, is_magnet, parse_magnet, FilenameProbe, MirrorResolver};
use crate::storage::StorageLayout;

use super::config::OrchestratorConfig;
use super::retry_queue::RetryQueue;
use super::types::{
    CreateDownload, CreatedDownload, OrchestratorError, OrchestratorStatus, RetryTrigger,
};

/// Collaborators handed to the orchestrator at construction.
pub struct OrchestratorDeps {
    pub registry: Arc<JobRegistry>,
    pub storage: StorageLayout,
    pub mirror: MirrorResolver,
    /// Metadata probe for HTTP sources. Without it names come from the URL.
    pub probe: Option<FilenameProbe>,
    pub filename_prefix: String,
    pub http: Arc<dyn DownloadBackend>,
    /// `None` when the peer transport is disabled.
    pub peer: Option<Arc<dyn DownloadBackend>>,
}

/// Whether a prepared job should actually start a new attempt.
enum Admission {
    Start,
    Skip,
}

/// How an attempt ended, decided under the registry lock.
enum Outcome {
    Completed,
    Retry { retry_count: u32 },
    Exhausted,
    Rejected,
}

/// How long a cancelled attempt may take to release the artifact before
/// its task is aborted.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

struct ActiveAttempt {
    attempt: u64,
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Cancel an attempt and wait until it has stopped writing.
async fn wait_for_exit(job_id: &str, previous: ActiveAttempt) {
    previous.cancel.cancel();
    let mut handle = previous.handle;
    if tokio::time::timeout(CANCEL_GRACE, &mut handle).await.is_err() {
        warn!(
            job_id = %job_id,
            attempt = previous.attempt,
            "Cancelled attempt did not stop in time, aborting"
        );
        handle.abort();
        let _ = handle.await;
    }
}

struct Inner {
    config: OrchestratorConfig,
    registry: Arc<JobRegistry>,
    storage: StorageLayout,
    mirror: MirrorResolver,
    probe: Option<FilenameProbe>,
    filename_prefix: String,
    http: Arc<dyn DownloadBackend>,
    peer: Option<Arc<dyn DownloadBackend>>,
    attempts: Mutex<HashMap<String, ActiveAttempt>>,
    retries: RetryQueue,
    admission: Option<Arc<Semaphore>>,
    running: AtomicBool,
}

/// Drives download jobs from creation to a terminal state.
///
/// Cloning is cheap; every clone shares the same state.
#[derive(Clone)]
pub struct DownloadOrchestrator {
    inner: Arc<Inner>,
}

fn transport_label(job: &Job) -> &'static str {
    if job.is_peer_transport {
        "torrent"
    } else {
        "http"
    }
}

impl DownloadOrchestrator {
    /// Create a new orchestrator.
    pub fn new(config: OrchestratorConfig, deps: OrchestratorDeps) -> Self {
        let admission = (config.max_concurrent_downloads > 0)
            .then(|| Arc::new(Semaphore::new(config.max_concurrent_downloads)));

        Self {
            inner: Arc::new(Inner {
                config,
                registry: deps.registry,
                storage: deps.storage,
                mirror: deps.mirror,
                probe: deps.probe,
                filename_prefix: deps.filename_prefix,
                http: deps.http,
                peer: deps.peer,
                attempts: Mutex::new(HashMap::new()),
                retries: RetryQueue::new(),
                admission,
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.inner.registry
    }

    pub fn storage(&self) -> &StorageLayout {
        &self.inner.storage
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Start the orchestrator and resume jobs left unfinished by a previous run.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return;
        }

        info!("Starting download orchestrator");

        let unfinished = self
            .inner
            .registry
            .filter(|job| matches!(job.state, JobState::Pending | JobState::Downloading));
        let mut recovered = 0;
        for job in unfinished {
            let result = self.launch_attempt(&job.id, None, |job| {
                Ok(match job.state {
                    JobState::Pending | JobState::Downloading => Admission::Start,
                    _ => Admission::Skip,
                })
            });
            match result {
                Ok(Some(_)) => recovered += 1,
                Ok(None) => {}
                Err(e) => warn!(job_id = %job.id, error = %e, "Failed to resume download"),
            }
        }
        if recovered > 0 {
            info!("Recovered {} unfinished downloads", recovered);
        }
    }

    /// Stop the orchestrator. Pending retries are dropped and live attempts cancelled.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return;
        }

        info!("Stopping download orchestrator");
        self.inner.retries.cancel_all();
        for (_, active) in self.attempts().drain() {
            active.cancel.cancel();
            active.handle.abort();
        }
        info!("Download orchestrator stopped");
    }

    /// Get current orchestrator status.
    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            running: self.inner.running.load(Ordering::Relaxed),
            active_attempts: self.attempts().len(),
            pending_retries: self.inner.retries.len(),
        }
    }

    /// Register a new job and start fetching it in the background.
    pub async fn create_download(
        &self,
        request: CreateDownload,
    ) -> Result<CreatedDownload, OrchestratorError> {
        let url = request.url.trim();
        if url.is_empty() {
            return Err(OrchestratorError::InvalidInput("URL is required".to_string()));
        }

        let ttl_hours = request
            .ttl_hours
            .unwrap_or(self.inner.config.default_ttl_hours);
        if !ttl_hours.is_finite() || ttl_hours <= 0.0 {
            return Err(OrchestratorError::InvalidInput(
                "hours must be a positive number".to_string(),
            ));
        }

        let (original_filename, is_peer_transport, resource_id, effective_url, total_bytes) =
            if is_magnet(url) {
                let magnet = parse_magnet(url);
                let name = magnet
                    .display_name
                    .clone()
                    .unwrap_or_else(|| "download".to_string());
                (name, true, Some(magnet.resource_id(url)), None, None)
            } else {
                let parsed = Url::parse(url).map_err(|e| {
                    OrchestratorError::InvalidInput(format!("invalid URL: {}", e))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(OrchestratorError::InvalidInput(format!(
                        "unsupported URL scheme: {}",
                        parsed.scheme()
                    )));
                }

                let (filename, content_length) = match &self.inner.probe {
                    Some(probe) => {
                        let info = probe.detect_filename(url).await;
                        (info.filename, info.content_length)
                    }
                    None => (choose_filename(url, None, None), None),
                };
                let effective = self.inner.mirror.resolve_fetch_url(url);
                (filename, false, None, Some(effective), content_length)
            };

        let now = Utc::now();
        let expires_at = ChronoDuration::try_milliseconds((ttl_hours * 3_600_000.0) as i64)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| OrchestratorError::InvalidInput("hours is too large".to_string()))?;
        let filename = compose_filename(
            &self.inner.filename_prefix,
            &generate_tag(),
            &original_filename,
        );

        let mut job = Job::pending(NewJob {
            id: generate_job_id(),
            owner_token: generate_owner_token(),
            source_url: url.to_string(),
            effective_url,
            download_url: self
                .inner
                .storage
                .download_url(is_peer_transport, &filename),
            filename,
            original_filename,
            is_peer_transport,
            resource_id,
            created_at: now,
            expires_at,
        });
        job.total_bytes = total_bytes;

        let created = CreatedDownload {
            id: job.id.clone(),
            owner_token: job.owner_token.clone(),
            expires_at,
        };

        info!(
            job_id = %job.id,
            transport = transport_label(&job),
            filename = %job.filename,
            "Download created"
        );
        self.inner.registry.insert(job)?;
        self.launch_attempt(&created.id, None, |_| Ok(Admission::Start))?;

        Ok(created)
    }

    /// Owner-requested retry of a failed job. Resets the retry budget.
    pub fn retry(&self, job_id: &str, owner_token: &str) -> Result<Job, OrchestratorError> {
        self.authorize(job_id, owner_token)?;
        self.inner.retries.cancel(job_id);

        let job = self.launch_attempt(job_id, Some(RetryTrigger::Manual), |job| {
            if job.state != JobState::Error {
                return Err(OrchestratorError::InvalidState {
                    expected: JobState::Error.as_str().to_string(),
                    actual: job.state.as_str().to_string(),
                });
            }
            job.retry_count = 0;
            Ok(Admission::Start)
        })?;

        job.ok_or_else(|| OrchestratorError::NotFound(job_id.to_string()))
    }

    /// Owner-requested deletion of a job and its artifact.
    pub async fn delete(&self, job_id: &str, owner_token: &str) -> Result<(), OrchestratorError> {
        let job = self.authorize(job_id, owner_token)?;
        self.discard(&job).await;
        info!(job_id = %job_id, "Download deleted");
        Ok(())
    }

    /// Restart or fail every DOWNLOADING job that exceeded the stuck timeout.
    ///
    /// Returns the number of jobs acted on.
    pub async fn check_stuck(&self, now: DateTime<Utc>) -> usize {
        let timeout = ChronoDuration::milliseconds(self.inner.config.stuck_timeout_ms as i64);
        let from_last_progress = self.inner.config.stuck_from_last_progress;
        let max_retries = self.inner.config.max_retries;

        let stuck = self.inner.registry.filter(|job| {
            job.state == JobState::Downloading
                && job
                    .liveness_anchor(from_last_progress)
                    .is_some_and(|anchor| now - anchor > timeout)
        });

        let mut handled = 0;
        for job in stuck {
            let attempt = job.attempt;
            let mut exhausted = false;
            let result = self.launch_attempt(&job.id, Some(RetryTrigger::Timeout), |job| {
                if job.state != JobState::Downloading || job.attempt != attempt {
                    return Ok(Admission::Skip);
                }
                if job.retry_count < max_retries {
                    job.retry_count += 1;
                    Ok(Admission::Start)
                } else {
                    job.fail("Download timed out");
                    exhausted = true;
                    Ok(Admission::Skip)
                }
            });

            match result {
                Ok(Some(restarted)) => {
                    handled += 1;
                    metrics::STUCK_DETECTIONS.inc();
                    warn!(
                        job_id = %restarted.id,
                        retry_count = restarted.retry_count,
                        "Download stuck, restarting"
                    );
                }
                Ok(None) if exhausted => {
                    handled += 1;
                    metrics::STUCK_DETECTIONS.inc();
                    metrics::DOWNLOADS_FAILED
                        .with_label_values(&[transport_label(&job), "permanent"])
                        .inc();
                    warn!(job_id = %job.id, "Download timed out with no retries left");
                    // The task removes its own entry once it has stopped.
                    if let Some(active) = self.attempts().get(&job.id) {
                        active.cancel.cancel();
                    }
                    if let Some(backend) = self.backend_for(&job) {
                        backend.cancel(&job).await;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(job_id = %job.id, error = %e, "Stuck check failed"),
            }
        }
        handled
    }

    /// Remove every job whose expiry has passed, with its artifact.
    ///
    /// Returns the number of jobs removed. Persists a snapshot if any were.
    pub async fn expire_jobs(&self, now: DateTime<Utc>) -> usize {
        let expired = self.inner.registry.filter(|job| job.is_expired(now));
        for job in &expired {
            self.discard(job).await;
            metrics::JOBS_EXPIRED.inc();
            info!(job_id = %job.id, state = job.state.as_str(), "Download expired");
        }

        if !expired.is_empty() {
            if let Err(e) = self.inner.registry.save_snapshot() {
                error!(error = %e, "Failed to save snapshot after expiry sweep");
            }
        }
        expired.len()
    }

    fn attempts(&self) -> MutexGuard<'_, HashMap<String, ActiveAttempt>> {
        self.inner
            .attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn authorize(&self, job_id: &str, owner_token: &str) -> Result<Job, OrchestratorError> {
        let job = self
            .inner
            .registry
            .get(job_id)
            .ok_or_else(|| OrchestratorError::NotFound(job_id.to_string()))?;
        if !tokens_match(&job.owner_token, owner_token) {
            return Err(OrchestratorError::Unauthorized(job_id.to_string()));
        }
        Ok(job)
    }

    fn backend_for(&self, job: &Job) -> Option<Arc<dyn DownloadBackend>> {
        if job.is_peer_transport {
            self.inner.peer.clone()
        } else {
            Some(Arc::clone(&self.inner.http))
        }
    }

    /// Drop a job: timers, live attempt, registry entry, transport state, artifact.
    async fn discard(&self, job: &Job) {
        self.inner.retries.cancel(&job.id);
        let active = self.attempts().remove(&job.id);
        self.inner.registry.remove(&job.id);
        if let Some(active) = active {
            wait_for_exit(&job.id, active).await;
        }

        if let Some(backend) = self.backend_for(job) {
            backend.cancel(job).await;
        }

        match self.inner.storage.remove_artifact(job) {
            Ok(true) => debug!(job_id = %job.id, "Removed artifact"),
            Ok(false) => {}
            Err(e) => warn!(
                job_id = %job.id,
                filename = %job.filename,
                error = %e,
                "Failed to remove artifact; registry entry removed anyway"
            ),
        }
    }

    /// Move a job into a new attempt and spawn its task.
    ///
    /// `prepare` runs under the registry lock and decides whether to start.
    fn launch_attempt<F>(
        &self,
        job_id: &str,
        trigger: Option<RetryTrigger>,
        prepare: F,
    ) -> Result<Option<Job>, OrchestratorError>
    where
        F: FnOnce(&mut Job) -> Result<Admission, OrchestratorError>,
    {
        let resume_bytes = match self.inner.registry.get(job_id) {
            Some(job) if !job.is_peer_transport => self.inner.storage.existing_size(&job),
            Some(_) => 0,
            None => return Err(OrchestratorError::NotFound(job_id.to_string())),
        };

        let now = Utc::now();
        let started = self
            .inner
            .registry
            .update(job_id, |job| {
                if let Admission::Skip = prepare(job)? {
                    return Ok(None);
                }
                if !job.state.can_transition_to(JobState::Downloading) {
                    return Err(OrchestratorError::InvalidState {
                        expected: "pending or error".to_string(),
                        actual: job.state.as_str().to_string(),
                    });
                }
                job.begin_attempt(now, resume_bytes);
                Ok(Some(job.clone()))
            })
            .ok_or_else(|| OrchestratorError::NotFound(job_id.to_string()))??;

        let Some(job) = started else {
            return Ok(None);
        };

        metrics::DOWNLOADS_STARTED
            .with_label_values(&[transport_label(&job)])
            .inc();
        if let Some(trigger) = trigger {
            metrics::RETRIES_TOTAL
                .with_label_values(&[trigger.as_str()])
                .inc();
        }
        info!(
            job_id = %job.id,
            attempt = job.attempt,
            trigger = trigger.map_or("initial", |t| t.as_str()),
            resume_bytes,
            "Starting download attempt"
        );

        let cancel = CancellationToken::new();
        let mut attempts = self.attempts();
        let previous = attempts.remove(&job.id);
        if let Some(previous) = &previous {
            previous.cancel.cancel();
        }
        let handle = tokio::spawn(self.clone().run_attempt(
            job.id.clone(),
            job.attempt,
            cancel.clone(),
            previous,
        ));
        attempts.insert(
            job.id.clone(),
            ActiveAttempt {
                attempt: job.attempt,
                handle,
                cancel,
            },
        );
        drop(attempts);

        Ok(Some(job))
    }

    async fn acquire_slot(&self, job_id: &str, attempt: u64) -> Option<Option<OwnedSemaphorePermit>> {
        let Some(semaphore) = &self.inner.admission else {
            return Some(None);
        };
        if let Ok(permit) = Arc::clone(semaphore).try_acquire_owned() {
            return Some(Some(permit));
        }

        // Queued attempts are not subject to the stuck timeout.
        self.inner.registry.update(job_id, |job| {
            if job.attempt == attempt {
                job.started_at = None;
            }
        });
        debug!(job_id = %job_id, "Waiting for a download slot");

        let permit = Arc::clone(semaphore).acquire_owned().await.ok()?;
        self.inner.registry.update(job_id, |job| {
            if job.attempt == attempt {
                job.started_at = Some(Utc::now());
            }
        });
        Some(Some(permit))
    }

    /// Attempt task body. A superseded attempt is drained first so only one
    /// task ever writes the artifact.
    async fn run_attempt(
        self,
        job_id: String,
        attempt: u64,
        cancel: CancellationToken,
        previous: Option<ActiveAttempt>,
    ) {
        if let Some(previous) = previous {
            wait_for_exit(&job_id, previous).await;
        }

        self.execute(&job_id, attempt, &cancel).await;

        let mut attempts = self.attempts();
        if attempts.get(&job_id).is_some_and(|a| a.attempt == attempt) {
            attempts.remove(&job_id);
        }
    }

    async fn execute(&self, job_id: &str, attempt: u64, cancel: &CancellationToken) {
        let slot = tokio::select! {
            _ = cancel.cancelled() => None,
            slot = self.acquire_slot(job_id, attempt) => slot,
        };
        let Some(_permit) = slot else {
            return;
        };

        let job = match self.inner.registry.get(job_id) {
            Some(job) if job.attempt == attempt && job.state == JobState::Downloading => job,
            _ => {
                debug!(job_id = %job_id, attempt, "Attempt superseded before start");
                return;
            }
        };

        let registry = Arc::clone(&self.inner.registry);
        let progress_id = job_id.to_string();
        let on_progress: ProgressCallback = Arc::new(move |update| {
            registry.update(&progress_id, |job| {
                if job.attempt == attempt {
                    job.apply_progress(update, Utc::now());
                }
            });
        });

        let started = Instant::now();
        let result = match self.backend_for(&job) {
            Some(backend) => {
                backend
                    .start_download(&job, on_progress, cancel.clone())
                    .await
            }
            None => Err(FetchError::Unsupported(
                "peer transport is disabled".to_string(),
            )),
        };

        // Whoever cancelled owns the job's next state.
        if let Err(FetchError::Cancelled) = result {
            debug!(job_id = %job_id, attempt, "Attempt cancelled");
            return;
        }
        self.finish_attempt(&job, attempt, result, started.elapsed());
    }

    fn finish_attempt(
        &self,
        job: &Job,
        attempt: u64,
        result: Result<(), FetchError>,
        elapsed: Duration,
    ) {
        let max_retries = self.inner.config.max_retries;
        let now = Utc::now();

        let outcome = self
            .inner
            .registry
            .update(&job.id, |current| {
                if current.attempt != attempt || current.state != JobState::Downloading {
                    return None;
                }
                Some(match &result {
                    Ok(()) => {
                        current.complete(now);
                        Outcome::Completed
                    }
                    Err(e) => {
                        current.fail(e.to_string());
                        if !e.is_retryable() {
                            Outcome::Rejected
                        } else {
                            if current.retry_count < max_retries {
                                current.retry_count += 1;
                            }
                            if current.retry_count < max_retries {
                                Outcome::Retry {
                                    retry_count: current.retry_count,
                                }
                            } else {
                                Outcome::Exhausted
                            }
                        }
                    }
                })
            })
            .flatten();

        let transport = transport_label(job);
        match (outcome, result) {
            (None, result) => {
                debug!(
                    job_id = %job.id,
                    attempt,
                    success = result.is_ok(),
                    "Ignoring outcome of superseded attempt"
                );
            }
            (Some(Outcome::Completed), _) => {
                metrics::DOWNLOADS_COMPLETED
                    .with_label_values(&[transport])
                    .inc();
                metrics::DOWNLOAD_DURATION
                    .with_label_values(&[transport])
                    .observe(elapsed.as_secs_f64());
                info!(job_id = %job.id, attempt, elapsed_secs = elapsed.as_secs(), "Download completed");
            }
            (Some(Outcome::Retry { retry_count }), Err(e)) => {
                metrics::DOWNLOADS_FAILED
                    .with_label_values(&[transport, "transient"])
                    .inc();
                warn!(
                    job_id = %job.id,
                    attempt,
                    retry_count,
                    error = %e,
                    "Download failed, scheduling retry"
                );
                self.schedule_retry(&job.id, attempt);
            }
            (Some(Outcome::Exhausted), Err(e)) => {
                metrics::DOWNLOADS_FAILED
                    .with_label_values(&[transport, "permanent"])
                    .inc();
                error!(job_id = %job.id, attempt, error = %e, "Download failed, retries exhausted");
            }
            (Some(Outcome::Rejected), Err(e)) => {
                metrics::DOWNLOADS_FAILED
                    .with_label_values(&[transport, "permanent"])
                    .inc();
                warn!(job_id = %job.id, attempt, error = %e, "Download rejected");
            }
            (Some(_), Ok(())) => {}
        }
    }

    fn schedule_retry(&self, job_id: &str, failed_attempt: u64) {
        let orchestrator = self.clone();
        let id = job_id.to_string();
        let delay = Duration::from_millis(self.inner.config.retry_delay_ms);

        self.inner.retries.schedule(job_id, delay, async move {
            let result = orchestrator.launch_attempt(&id, Some(RetryTrigger::Failure), |job| {
                Ok(
                    if job.state == JobState::Error && job.attempt == failed_attempt {
                        Admission::Start
                    } else {
                        Admission::Skip
                    },
                )
            });
            match result {
                Ok(_) | Err(OrchestratorError::NotFound(_)) => {}
                Err(e) => warn!(job_id = %id, error = %e, "Automatic retry failed to start"),
            }
        });
    }
}
