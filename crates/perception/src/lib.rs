//! Exam Perception Adapters
//!
//! Black-box perception over a single decoded frame:
//! - Face detection with per-face head pose (pitch, yaw)
//! - Prohibited object detection (phone, book, extra person)
//!
//! Adapters are stateless; everything session-aware lives in the proctor crate.

pub mod config;
pub mod onnx;
pub mod scripted;
pub mod types;

pub use config::PerceptionConfig;
pub use onnx::OnnxPerception;
pub use scripted::ScriptedPerception;
pub use types::{
    BoundingBox, DetectedObject, FaceObservation, HeadPose, ObjectClass, PerceptionResult,
};

use frame_codec::VideoFrame;
use thiserror::Error;

/// Perception error types
#[derive(Error, Debug)]
pub enum PerceptionError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Image processing failed: {0}")]
    ImageProcessing(String),

    #[error("Unexpected model output: {0}")]
    OutputShape(String),
}

/// A pure function of one frame: faces with head pose, and detected objects
pub trait PerceptionAdapter: Send + Sync {
    /// Run perception over a frame
    fn detect(&self, frame: &VideoFrame) -> Result<PerceptionResult, PerceptionError>;

    /// Whether real models back this adapter
    fn models_loaded(&self) -> bool {
        false
    }
}
