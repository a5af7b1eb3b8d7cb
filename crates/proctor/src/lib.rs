//! Proctoring Session Engine
//!
//! Turns a stream of webcam frames and audio levels per exam session into
//! debounced violation events:
//! - Head-pose calibration against a per-student baseline
//! - Pre-exam environment readiness (lighting, face presence, centering)
//! - Per-session hysteresis and cooldown for every violation kind
//! - Evidence snapshots for violations that need a preserved frame

pub mod calibration;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod environment;
pub mod evidence;
pub mod state;
pub mod violation;

pub use calibration::{calibrate_from, Baseline, CalibrationFailure, CalibrationOutcome};
pub use classifier::{FrameAssessment, FrameSignals, ViolationClassifier};
pub use config::{CooldownConfig, ProctorConfig, UnknownSessionPolicy};
pub use engine::{AudioOutcome, FrameOutcome, ProctorEngine};
pub use environment::{assess, EnvironmentReport};
pub use crate::evidence::{capture, is_evidentiary, EvidenceArtifact};
pub use state::{SessionHandle, SessionSnapshot, SessionState, SessionStore};
pub use violation::{Severity, ViolationEvent, ViolationKind};

use frame_codec::DecodeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Proctoring error types
#[derive(Error, Debug)]
pub enum ProctorError {
    #[error("Invalid frame data: {0}")]
    Decode(#[from] DecodeError),

    #[error("Perception timed out after {0}ms")]
    PerceptionTimeout(u64),

    #[error("Perception failed: {0}")]
    Perception(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Session closed: {0}")]
    SessionClosed(String),
}

impl ProctorError {
    /// Stable machine-readable code for transport error bodies
    pub fn code(&self) -> &'static str {
        match self {
            ProctorError::Decode(_) => "invalid_frame",
            ProctorError::PerceptionTimeout(_) => "perception_timeout",
            ProctorError::Perception(_) => "perception_failed",
            ProctorError::UnknownSession(_) => "unknown_session",
            ProctorError::SessionClosed(_) => "session_closed",
        }
    }
}

/// Per-frame request metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameRequest {
    pub session_id: String,
    #[serde(default)]
    pub student_id: Option<String>,
    /// Baseline carried by the client; used only when the session has none
    #[serde(default)]
    pub baseline: Option<Baseline>,
}

impl FrameRequest {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn with_baseline(mut self, baseline: Baseline) -> Self {
        self.baseline = Some(baseline);
        self
    }

    pub fn with_student(mut self, student_id: impl Into<String>) -> Self {
        self.student_id = Some(student_id.into());
        self
    }
}
