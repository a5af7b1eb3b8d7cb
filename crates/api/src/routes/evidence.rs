//! Client-submitted violation snapshots

use axum::{extract::State, Json};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use evidence::EvidenceUpload;
use frame_codec::DecodeError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct SnapshotUploadRequest {
    pub exam_id: String,
    pub student_id: String,
    pub violation_type: String,
    pub snapshot_base64: String,
}

#[derive(Debug, Serialize)]
pub struct SnapshotUploadResponse {
    pub success: bool,
    pub url: String,
    pub filename: String,
}

/// Store a snapshot the client captured itself
pub async fn upload_snapshot(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SnapshotUploadRequest>,
) -> Result<Json<SnapshotUploadResponse>, ApiError> {
    let store = state.evidence_store.clone().ok_or(ApiError::EvidenceDisabled)?;

    let body = frame_codec::strip_data_url(request.snapshot_base64.trim());
    let jpeg = STANDARD
        .decode(body)
        .map_err(|e| DecodeError::Base64(e.to_string()))?;
    if jpeg.is_empty() {
        return Err(DecodeError::Empty.into());
    }

    let upload = EvidenceUpload::new(
        request.exam_id,
        Some(request.student_id),
        request.violation_type,
        jpeg,
    );
    let filename = upload.object_name();

    let url = tokio::task::spawn_blocking(move || store.store(&upload))
        .await
        .map_err(|e| ApiError::Task(e.to_string()))??;
    info!("Snapshot uploaded: {}", filename);

    Ok(Json(SnapshotUploadResponse {
        success: true,
        url,
        filename,
    }))
}
