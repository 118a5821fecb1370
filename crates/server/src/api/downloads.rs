//! Download job API handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::SecondsFormat;
use nexusdrop_core::{CreateDownload, Job, JobState, OrchestratorError, TransportTelemetry};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::handlers::{api_error, ApiError};
use crate::state::AppState;

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateDownloadRequest {
    #[serde(default)]
    pub url: Option<String>,
    /// Time to live in hours; the configured default applies when absent.
    #[serde(default)]
    pub hours: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDownloadResponse {
    pub id: String,
    pub owner_id: String,
    pub expires_at: String,
}

/// Owner capability presented for delete and retry.
#[derive(Debug, Default, Deserialize)]
pub struct OwnerRequest {
    #[serde(default, rename = "ownerId")]
    pub owner_id: String,
}

impl OwnerRequest {
    /// Parse an optional JSON body. A missing or malformed body presents an
    /// empty owner id, so unknown ids still answer 404 before 403.
    fn from_body(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryResponse {
    pub message: String,
    pub expires_at: String,
}

/// Job record as exposed to pollers. The owner token never leaves the
/// server after creation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub id: String,
    pub source_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_url: Option<String>,
    pub filename: String,
    pub original_filename: String,
    pub is_peer_transport: bool,
    pub state: JobState,
    pub progress_percent: f64,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub speed_bytes_per_sec: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_telemetry: Option<TransportTelemetry>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub expires_at: i64,
    pub error: Option<String>,
    pub retry_count: u32,
    pub download_url: String,
}

impl From<&Job> for JobResponse {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            source_url: job.source_url.clone(),
            effective_url: job.effective_url.clone(),
            filename: job.filename.clone(),
            original_filename: job.original_filename.clone(),
            is_peer_transport: job.is_peer_transport,
            state: job.state,
            progress_percent: job.progress_percent,
            downloaded_bytes: job.downloaded_bytes,
            total_bytes: job.total_bytes,
            speed_bytes_per_sec: job.speed_bytes_per_sec,
            transport_telemetry: job.transport_telemetry.clone(),
            created_at: job.created_at.timestamp_millis(),
            started_at: job.started_at.map(|t| t.timestamp_millis()),
            completed_at: job.completed_at.map(|t| t.timestamp_millis()),
            expires_at: job.expires_at.timestamp_millis(),
            error: job.error.clone(),
            retry_count: job.retry_count,
            download_url: job.download_url.clone(),
        }
    }
}

fn not_found() -> ApiError {
    api_error(StatusCode::NOT_FOUND, "Download not found")
}

// ============================================================================
// Handlers
// ============================================================================

/// Register a download and start fetching it in the background.
pub async fn create_download(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateDownloadRequest>,
) -> Result<Json<CreateDownloadResponse>, ApiError> {
    let url = request.url.unwrap_or_default();
    if url.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "URL is required"));
    }

    let created = state
        .orchestrator()
        .create_download(CreateDownload {
            url,
            ttl_hours: request.hours,
        })
        .await
        .map_err(|e| match e {
            OrchestratorError::InvalidInput(msg) => api_error(StatusCode::BAD_REQUEST, msg),
            other => {
                warn!(error = %other, "Failed to create download");
                api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to start download: {}", other),
                )
            }
        })?;

    Ok(Json(CreateDownloadResponse {
        id: created.id,
        owner_id: created.owner_token,
        expires_at: created.expires_at.to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}

/// All known jobs keyed by id.
pub async fn list_downloads(
    State(state): State<Arc<AppState>>,
) -> Json<HashMap<String, JobResponse>> {
    let jobs = state.orchestrator().registry().list();
    Json(
        jobs.iter()
            .map(|(id, job)| (id.clone(), JobResponse::from(job)))
            .collect(),
    )
}

/// Delete a job and its artifact. Owner only.
pub async fn delete_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<MessageResponse>, ApiError> {
    let request = OwnerRequest::from_body(&body);
    match state.orchestrator().delete(&id, &request.owner_id).await {
        Ok(()) => {
            info!(job_id = %id, "Download deleted via API");
            Ok(Json(MessageResponse {
                message: "Download deleted successfully".to_string(),
            }))
        }
        Err(OrchestratorError::NotFound(_)) => Err(not_found()),
        Err(OrchestratorError::Unauthorized(_)) => Err(api_error(
            StatusCode::FORBIDDEN,
            "Not authorized to delete this download",
        )),
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// Reset the retry budget of a failed job and fetch it again. Owner only.
pub async fn retry_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<RetryResponse>, ApiError> {
    let request = OwnerRequest::from_body(&body);
    match state.orchestrator().retry(&id, &request.owner_id) {
        Ok(job) => Ok(Json(RetryResponse {
            message: "Download retry initiated".to_string(),
            expires_at: job.expires_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        })),
        Err(OrchestratorError::NotFound(_)) => Err(not_found()),
        Err(OrchestratorError::Unauthorized(_)) => Err(api_error(
            StatusCode::FORBIDDEN,
            "Not authorized to retry this download",
        )),
        Err(e @ OrchestratorError::InvalidState { .. }) => {
            Err(api_error(StatusCode::CONFLICT, e.to_string()))
        }
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}
