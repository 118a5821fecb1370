//! Job record and the values flowing into it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a download job.
///
/// `Pending -> Downloading -> {Completed | Error}`; `Error` may re-enter
/// `Downloading` through an automatic or manual retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Downloading,
    Completed,
    Error,
}

impl JobState {
    /// Returns the string representation for API responses and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Downloading => "downloading",
            JobState::Completed => "completed",
            JobState::Error => "error",
        }
    }

    /// Whether `next` is a legal successor of this state.
    ///
    /// `Downloading -> Downloading` is a restart of a stuck attempt.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Downloading)
                | (Downloading, Downloading)
                | (Downloading, Completed)
                | (Downloading, Error)
                | (Error, Downloading)
        )
    }

    pub fn all() -> [JobState; 4] {
        [
            JobState::Pending,
            JobState::Downloading,
            JobState::Completed,
            JobState::Error,
        ]
    }
}

/// Swarm statistics reported by the peer transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportTelemetry {
    pub peers: u32,
    pub ratio: f64,
    pub uploaded_bytes: u64,
    pub upload_speed: u64,
    /// Estimated seconds until completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<u64>,
}

/// A progress event emitted by a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub progress_percent: f64,
    pub speed_bytes_per_sec: u64,
    pub telemetry: Option<TransportTelemetry>,
}

/// One requested file acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    /// URL as submitted.
    pub source_url: String,
    /// URL actually fetched after mirror resolution (HTTP only).
    #[serde(default)]
    pub effective_url: Option<String>,
    /// On-disk artifact name.
    pub filename: String,
    pub original_filename: String,
    pub is_peer_transport: bool,
    /// Content address used to detect duplicate peer fetches.
    #[serde(default)]
    pub resource_id: Option<String>,
    pub state: JobState,
    #[serde(default)]
    pub progress_percent: f64,
    #[serde(default)]
    pub downloaded_bytes: u64,
    #[serde(default)]
    pub total_bytes: Option<u64>,
    #[serde(default)]
    pub speed_bytes_per_sec: u64,
    #[serde(default)]
    pub transport_telemetry: Option<TransportTelemetry>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_progress_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    /// Capability secret required for delete and retry.
    #[serde(rename = "ownerId")]
    pub owner_token: String,
    /// Public URL of the finished artifact.
    #[serde(default)]
    pub download_url: String,
    /// Generation of the current attempt. Outcomes from older attempts are
    /// discarded.
    #[serde(skip)]
    pub attempt: u64,
}

/// Everything needed to register a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub owner_token: String,
    pub source_url: String,
    pub effective_url: Option<String>,
    pub filename: String,
    pub original_filename: String,
    pub is_peer_transport: bool,
    pub resource_id: Option<String>,
    pub download_url: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Job {
    /// Build a PENDING job.
    pub fn pending(new: NewJob) -> Self {
        Self {
            id: new.id,
            source_url: new.source_url,
            effective_url: new.effective_url,
            filename: new.filename,
            original_filename: new.original_filename,
            is_peer_transport: new.is_peer_transport,
            resource_id: new.resource_id,
            state: JobState::Pending,
            progress_percent: 0.0,
            downloaded_bytes: 0,
            total_bytes: None,
            speed_bytes_per_sec: 0,
            transport_telemetry: None,
            created_at: new.created_at,
            started_at: None,
            completed_at: None,
            last_progress_at: None,
            expires_at: new.expires_at,
            error: None,
            retry_count: 0,
            owner_token: new.owner_token,
            download_url: new.download_url,
            attempt: 0,
        }
    }

    /// Enter DOWNLOADING for a new attempt and return its generation.
    ///
    /// `resume_bytes` is what is already on disk. Progress is kept when the
    /// job was already downloading so it stays monotonic across a restart.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>, resume_bytes: u64) -> u64 {
        if self.state != JobState::Downloading {
            self.progress_percent = match self.total_bytes {
                Some(total) if total > 0 => {
                    (resume_bytes as f64 / total as f64 * 100.0).min(100.0)
                }
                _ => 0.0,
            };
        }
        self.state = JobState::Downloading;
        self.started_at = Some(now);
        self.completed_at = None;
        self.error = None;
        self.downloaded_bytes = resume_bytes;
        self.speed_bytes_per_sec = 0;
        self.attempt += 1;
        self.attempt
    }

    /// Apply a backend progress event.
    pub fn apply_progress(&mut self, update: ProgressUpdate, now: DateTime<Utc>) {
        if self.state != JobState::Downloading {
            return;
        }
        self.downloaded_bytes = update.downloaded_bytes;
        if update.total_bytes.is_some() {
            self.total_bytes = update.total_bytes;
        }
        let percent = update.progress_percent.clamp(0.0, 100.0);
        if percent > self.progress_percent {
            self.progress_percent = percent;
        }
        self.speed_bytes_per_sec = update.speed_bytes_per_sec;
        if update.telemetry.is_some() {
            self.transport_telemetry = update.telemetry;
        }
        self.last_progress_at = Some(now);
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Completed;
        self.progress_percent = 100.0;
        self.completed_at = Some(now);
        self.speed_bytes_per_sec = 0;
        self.error = None;
        if let Some(total) = self.total_bytes {
            self.downloaded_bytes = self.downloaded_bytes.max(total);
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.state = JobState::Error;
        self.error = Some(message.into());
        self.speed_bytes_per_sec = 0;
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Moment the stuck timeout is measured from.
    pub fn liveness_anchor(&self, from_last_progress: bool) -> Option<DateTime<Utc>> {
        match (self.started_at, from_last_progress) {
            (Some(started), true) => Some(
                self.last_progress_at
                    .map_or(started, |last| last.max(started)),
            ),
            (started, _) => started,
        }
    }
}
