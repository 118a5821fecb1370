//! Descriptor upload for the peer transport.

use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use nexusdrop_core::UploadedResource;

use super::handlers::{api_error, ApiError};
use crate::state::AppState;

/// Convert an uploaded `.torrent` file into a magnet URI.
pub async fn upload_resource(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadedResource>, ApiError> {
    let backend = match state.torrent_backend() {
        Some(backend) => backend,
        None => {
            return Err(api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "Peer transport is disabled",
            ))
        }
    };

    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("").to_string();
        match field.bytes().await {
            Ok(bytes) => upload = Some((filename, bytes.to_vec())),
            Err(e) => {
                return Err(api_error(
                    StatusCode::BAD_REQUEST,
                    format!("Failed to read file: {}", e),
                ))
            }
        }
    }

    let (filename, data) =
        upload.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "No file uploaded"))?;

    backend
        .upload_resource(&data, &filename)
        .map(Json)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))
}
