//! Error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use evidence::EvidenceError;
use frame_codec::DecodeError;
use proctor::ProctorError;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Proctor(#[from] ProctorError),

    #[error("Invalid frame data: {0}")]
    InvalidFrame(#[from] DecodeError),

    #[error("Evidence storage is not configured")]
    EvidenceDisabled,

    #[error("Evidence storage failed: {0}")]
    Evidence(#[from] EvidenceError),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Structured error body returned by every route
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Proctor(e) => match e {
                ProctorError::Decode(_) => StatusCode::BAD_REQUEST,
                ProctorError::UnknownSession(_) => StatusCode::NOT_FOUND,
                ProctorError::SessionClosed(_) => StatusCode::CONFLICT,
                ProctorError::PerceptionTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
                ProctorError::Perception(_) => StatusCode::BAD_GATEWAY,
            },
            ApiError::InvalidFrame(_) => StatusCode::BAD_REQUEST,
            ApiError::EvidenceDisabled => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Evidence(_) | ApiError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Proctor(e) => e.code(),
            ApiError::InvalidFrame(_) => "invalid_frame",
            ApiError::EvidenceDisabled => "evidence_disabled",
            ApiError::Evidence(_) => "evidence_failed",
            ApiError::Task(_) => "internal",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.code(),
            message: self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }
        (status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(DecodeError::Empty).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ProctorError::UnknownSession("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(ProctorError::SessionClosed("x".into())).code(),
            "session_closed"
        );
        assert_eq!(ApiError::EvidenceDisabled.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
