//! Pre-exam environment readiness

use frame_codec::VideoFrame;
use perception::PerceptionResult;
use serde::{Deserialize, Serialize};

use crate::ProctorConfig;

/// Lighting and framing check result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentReport {
    pub lighting_ok: bool,
    pub face_detected: bool,
    pub face_centered: bool,
    /// Mean frame luminance (0-255)
    pub brightness: f32,
    pub message: String,
}

impl EnvironmentReport {
    pub fn ready(&self) -> bool {
        self.lighting_ok && self.face_detected && self.face_centered
    }

    /// Report for a frame that could not be decoded
    pub fn invalid_frame() -> Self {
        Self {
            lighting_ok: false,
            face_detected: false,
            face_centered: false,
            brightness: 0.0,
            message: "Invalid frame data".to_string(),
        }
    }
}

/// Evaluate lighting, face presence, and face centering.
///
/// `perception` is `None` when the detector could not answer; that reads as
/// "no face" rather than an error.
pub fn assess(
    frame: &VideoFrame,
    perception: Option<&PerceptionResult>,
    config: &ProctorConfig,
) -> EnvironmentReport {
    let brightness = frame.mean_luminance();
    let lighting_ok = brightness >= config.min_brightness;

    let face = perception.and_then(|p| p.faces.first());
    let face_detected = face.is_some();
    let face_centered = face
        .map(|f| {
            let (fx, fy) = f.bbox.center();
            let (cx, cy) = frame.center();
            (fx - cx).abs() <= config.centering_tolerance * frame.width as f32
                && (fy - cy).abs() <= config.centering_tolerance * frame.height as f32
        })
        .unwrap_or(false);

    let mut issues = Vec::new();
    if !lighting_ok {
        issues.push("Lighting is too dark");
    }
    if !face_detected {
        issues.push("No face detected");
    } else if !face_centered {
        issues.push("Face is not centered in frame");
    }

    let message = if issues.is_empty() {
        "Environment check passed".to_string()
    } else {
        issues.join("; ")
    };

    EnvironmentReport {
        lighting_ok,
        face_detected,
        face_centered,
        brightness,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perception::{BoundingBox, FaceObservation, HeadPose};

    fn face_at(x: f32, y: f32) -> PerceptionResult {
        PerceptionResult::new(
            vec![FaceObservation {
                bbox: BoundingBox::new(x, y, 100.0, 100.0),
                pose: HeadPose::default(),
                confidence: 0.9,
            }],
            vec![],
        )
    }

    #[test]
    fn test_dark_frame_without_face() {
        let frame = VideoFrame::solid(640, 480, [10, 10, 10]);
        let report = assess(&frame, Some(&PerceptionResult::default()), &ProctorConfig::default());

        assert!(!report.lighting_ok);
        assert!(!report.face_detected);
        assert!(!report.face_centered);
        assert_eq!(report.message, "Lighting is too dark; No face detected");
    }

    #[test]
    fn test_ready() {
        let frame = VideoFrame::solid(640, 480, [150, 150, 150]);
        // Face centre at (320, 240)
        let report = assess(&frame, Some(&face_at(270.0, 190.0)), &ProctorConfig::default());
        assert!(report.ready());
        assert_eq!(report.message, "Environment check passed");
    }

    #[test]
    fn test_off_centre_face() {
        let frame = VideoFrame::solid(640, 480, [150, 150, 150]);
        let report = assess(&frame, Some(&face_at(0.0, 0.0)), &ProctorConfig::default());
        assert!(report.lighting_ok);
        assert!(report.face_detected);
        assert!(!report.face_centered);
        assert_eq!(report.message, "Face is not centered in frame");
    }

    #[test]
    fn test_perception_unavailable_means_no_face() {
        let frame = VideoFrame::solid(64, 48, [200, 200, 200]);
        let report = assess(&frame, None, &ProctorConfig::default());
        assert!(report.lighting_ok);
        assert!(!report.face_detected);
    }
}
