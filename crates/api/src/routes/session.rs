//! Calibration, readiness, and frame routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::SecondsFormat;
use perception::HeadPose;
use proctor::{Baseline, EnvironmentReport, FrameOutcome, FrameRequest, SessionSnapshot, ViolationEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct CalibrationRequest {
    pub frame_base64: String,
    /// Store the baseline on this session as well
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CalibrationResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yaw: Option<f32>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct EnvironmentCheckRequest {
    pub frame_base64: String,
}

#[derive(Debug, Deserialize)]
pub struct FrameProcessRequest {
    pub session_id: String,
    pub frame_base64: String,
    #[serde(default)]
    pub calibrated_pitch: Option<f32>,
    #[serde(default)]
    pub calibrated_yaw: Option<f32>,
    #[serde(default)]
    pub student_id: Option<String>,
}

impl FrameProcessRequest {
    fn frame_request(&self) -> FrameRequest {
        FrameRequest {
            session_id: self.session_id.clone(),
            student_id: self.student_id.clone(),
            baseline: client_baseline(self.calibrated_pitch, self.calibrated_yaw),
        }
    }
}

/// Baseline carried by a client frame; absent when neither axis is sent
pub(crate) fn client_baseline(pitch: Option<f32>, yaw: Option<f32>) -> Option<Baseline> {
    match (pitch, yaw) {
        (None, None) => None,
        (pitch, yaw) => Some(Baseline::new(pitch.unwrap_or(0.0), yaw.unwrap_or(0.0))),
    }
}

/// Frame outcome as sent to clients (HTTP body and WebSocket `detection_result`)
#[derive(Debug, Serialize)]
pub struct FrameResponse {
    pub session_id: String,
    /// RFC3339
    pub timestamp: String,
    pub violations: Vec<ViolationEvent>,
    pub head_pose: Option<HeadPose>,
    pub face_count: usize,
    pub looking_away: bool,
    pub multiple_faces: bool,
    pub no_person: bool,
    pub phone_detected: bool,
    pub book_detected: bool,
    pub degraded: bool,
    pub evidence_id: Option<String>,
    /// JPEG evidence, base64
    pub snapshot_base64: Option<String>,
}

impl From<FrameOutcome> for FrameResponse {
    fn from(outcome: FrameOutcome) -> Self {
        Self {
            session_id: outcome.session_id,
            timestamp: outcome.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            violations: outcome.violations,
            head_pose: outcome.head_pose,
            face_count: outcome.face_count,
            looking_away: outcome.looking_away,
            multiple_faces: outcome.multiple_faces,
            no_person: outcome.no_person,
            phone_detected: outcome.phone_detected,
            book_detected: outcome.book_detected,
            degraded: outcome.degraded,
            evidence_id: outcome.evidence.as_ref().map(|e| e.id.to_string()),
            snapshot_base64: outcome.evidence.map(|e| STANDARD.encode(e.jpeg)),
        }
    }
}

/// Calibrate head pose from one frame
pub async fn calibrate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CalibrationRequest>,
) -> Json<CalibrationResponse> {
    let frame = match frame_codec::decode_base64(&request.frame_base64) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("Calibration frame rejected: {}", e);
            return Json(CalibrationResponse {
                success: false,
                pitch: None,
                yaw: None,
                message: "Invalid frame data".to_string(),
            });
        }
    };

    let outcome = match &request.session_id {
        Some(session_id) => state.engine.calibrate_session(session_id, frame).await,
        None => state.engine.calibrate(frame).await,
    };
    let baseline = outcome.baseline();

    Json(CalibrationResponse {
        success: outcome.is_success(),
        pitch: baseline.map(|b| b.pitch),
        yaw: baseline.map(|b| b.yaw),
        message: outcome.message(),
    })
}

/// Lighting and framing readiness
pub async fn environment_check(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EnvironmentCheckRequest>,
) -> Json<EnvironmentReport> {
    match frame_codec::decode_base64(&request.frame_base64) {
        Ok(frame) => Json(state.engine.check_environment(frame).await),
        Err(e) => {
            debug!("Environment frame rejected: {}", e);
            Json(EnvironmentReport::invalid_frame())
        }
    }
}

/// Classify one frame
pub async fn process_frame(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FrameProcessRequest>,
) -> Result<Json<FrameResponse>, ApiError> {
    let frame = frame_codec::decode_base64(&request.frame_base64)?;
    let outcome = state.engine.process_frame(request.frame_request(), frame).await?;
    Ok(Json(outcome.into()))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    state
        .engine
        .session_snapshot(&session_id)
        .await
        .map(Json)
        .ok_or_else(|| proctor::ProctorError::UnknownSession(session_id).into())
}

/// Tear down a session; idempotent
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> StatusCode {
    state.engine.end_session(&session_id).await;
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_baseline() {
        assert_eq!(client_baseline(None, None), None);
        assert_eq!(client_baseline(Some(4.0), None), Some(Baseline::new(4.0, 0.0)));
        assert_eq!(client_baseline(None, Some(-2.5)), Some(Baseline::new(0.0, -2.5)));
    }
}
