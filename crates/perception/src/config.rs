//! Perception configuration

use serde::{Deserialize, Serialize};

/// Perception model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionConfig {
    /// Face detection confidence threshold
    pub face_confidence: f32,

    /// Minimum object confidence kept by the detector (per-class policy is applied later)
    pub object_confidence: f32,

    /// IoU above which overlapping detections are merged
    pub nms_iou: f32,

    /// Model paths
    pub face_model_path: Option<String>,
    pub pose_model_path: Option<String>,
    pub object_model_path: Option<String>,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            face_confidence: 0.7,
            object_confidence: 0.25,
            nms_iou: 0.45,
            face_model_path: None,
            pose_model_path: None,
            object_model_path: None,
        }
    }
}
