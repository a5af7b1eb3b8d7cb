//! Head-pose calibration

use perception::PerceptionResult;
use serde::{Deserialize, Serialize};

/// Reference head pose for gaze deviation
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Baseline {
    pub pitch: f32,
    pub yaw: f32,
}

impl Baseline {
    pub fn new(pitch: f32, yaw: f32) -> Self {
        Self { pitch, yaw }
    }

    /// Per-axis absolute deviation (pitch, yaw) of a pose from this baseline
    pub fn deviation(&self, pitch: f32, yaw: f32) -> (f32, f32) {
        ((pitch - self.pitch).abs(), (yaw - self.yaw).abs())
    }
}

/// Why calibration did not produce a baseline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalibrationFailure {
    NoFace,
    MultipleFaces(usize),
    /// Perception did not answer (timeout or model failure)
    Perception(String),
}

impl std::fmt::Display for CalibrationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalibrationFailure::NoFace => f.write_str("no face detected"),
            CalibrationFailure::MultipleFaces(_) => {
                f.write_str("multiple faces detected — calibration requires solitary subject")
            }
            CalibrationFailure::Perception(reason) => write!(f, "perception unavailable: {}", reason),
        }
    }
}

/// Result of a single-shot calibration
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationOutcome {
    Calibrated(Baseline),
    Failed(CalibrationFailure),
}

impl CalibrationOutcome {
    pub fn baseline(&self) -> Option<Baseline> {
        match self {
            CalibrationOutcome::Calibrated(b) => Some(*b),
            CalibrationOutcome::Failed(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CalibrationOutcome::Calibrated(_))
    }

    /// Human-readable summary
    pub fn message(&self) -> String {
        match self {
            CalibrationOutcome::Calibrated(_) => "Calibration successful".to_string(),
            CalibrationOutcome::Failed(reason) => reason.to_string(),
        }
    }
}

/// Derive a baseline from one perception pass; exactly one face is required
pub fn calibrate_from(result: &PerceptionResult) -> CalibrationOutcome {
    match result.faces.as_slice() {
        [] => CalibrationOutcome::Failed(CalibrationFailure::NoFace),
        [face] => CalibrationOutcome::Calibrated(Baseline::new(face.pose.pitch, face.pose.yaw)),
        faces => CalibrationOutcome::Failed(CalibrationFailure::MultipleFaces(faces.len())),
    }
}
