//! ONNX Runtime backed face, pose, and object models

use frame_codec::VideoFrame;
use ndarray::{Array4, Ix3};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use tracing::{debug, error, info, warn};

use crate::types::non_max_suppression;
use crate::{
    BoundingBox, DetectedObject, FaceObservation, HeadPose, ObjectClass, PerceptionAdapter,
    PerceptionConfig, PerceptionError, PerceptionResult,
};

/// UltraFace RFB-320 input size
const FACE_INPUT: (u32, u32) = (320, 240);
/// Head-pose regressor input size
const POSE_INPUT: u32 = 224;
/// YOLOv8 (COCO-80) input size
const OBJECT_INPUT: u32 = 640;
/// Box coordinates plus the COCO class rows we read (book is index 73)
const MIN_OBJECT_ROWS: usize = 4 + 74;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Face detector + head-pose estimator + object detector.
///
/// Model contracts:
/// - face: UltraFace layout, outputs `scores [1, N, 2]` and normalized
///   corner `boxes [1, N, 4]`
/// - pose: face crop in, `[1, 3]` (yaw, pitch, roll) degrees out
/// - object: YOLOv8 COCO head, `[1, 84, N]` (cx, cy, w, h, class scores)
///
/// Without a face model path the adapter runs in mock mode and reports a
/// single centred, forward-facing face.
pub struct OnnxPerception {
    config: PerceptionConfig,
    face_session: Option<Session>,
    pose_session: Option<Session>,
    object_session: Option<Session>,
}

impl OnnxPerception {
    pub fn new(config: &PerceptionConfig) -> Result<Self, PerceptionError> {
        let face_session = match &config.face_model_path {
            Some(path) => Some(load_session(path, "face")?),
            None => {
                warn!("No face model path configured. Using mock implementation.");
                None
            }
        };
        // Pose is optional: without it faces report a neutral pose
        let pose_session = match &config.pose_model_path {
            Some(path) => match load_session(path, "pose") {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!("Continuing without head-pose model: {}", e);
                    None
                }
            },
            None => None,
        };
        let object_session = match &config.object_model_path {
            Some(path) => Some(load_session(path, "object")?),
            None => {
                warn!("No object model path configured. Object detection disabled.");
                None
            }
        };

        Ok(Self {
            config: config.clone(),
            face_session,
            pose_session,
            object_session,
        })
    }

    /// Detect faces and estimate each face's head pose
    fn detect_faces(&self, frame: &VideoFrame) -> Result<Vec<FaceObservation>, PerceptionError> {
        let Some(session) = &self.face_session else {
            return Ok(vec![mock_face(frame)]);
        };

        let input = to_tensor(frame, FACE_INPUT.0, FACE_INPUT.1, |p, _| {
            (p as f32 - 127.0) / 128.0
        });
        let outputs = session
            .run(ort::inputs![input].map_err(inference)?)
            .map_err(inference)?;

        let scores = outputs[0].try_extract_tensor::<f32>().map_err(inference)?;
        let boxes = outputs[1].try_extract_tensor::<f32>().map_err(inference)?;
        let scores = scores
            .into_dimensionality::<Ix3>()
            .map_err(|e| PerceptionError::OutputShape(e.to_string()))?;
        let boxes = boxes
            .into_dimensionality::<Ix3>()
            .map_err(|e| PerceptionError::OutputShape(e.to_string()))?;

        let count = scores.shape()[1];
        if boxes.shape()[1] != count || scores.shape()[2] < 2 || boxes.shape()[2] < 4 {
            return Err(PerceptionError::OutputShape(format!(
                "face scores {:?} / boxes {:?}",
                scores.shape(),
                boxes.shape()
            )));
        }

        let (fw, fh) = (frame.width as f32, frame.height as f32);
        let mut candidates = Vec::new();
        for i in 0..count {
            let score = scores[[0, i, 1]];
            if score < self.config.face_confidence {
                continue;
            }
            let bbox = BoundingBox::from_corners(
                boxes[[0, i, 0]] * fw,
                boxes[[0, i, 1]] * fh,
                boxes[[0, i, 2]] * fw,
                boxes[[0, i, 3]] * fh,
            );
            candidates.push((bbox, score));
        }

        non_max_suppression(candidates, self.config.nms_iou, |c| *c)
            .into_iter()
            .map(|(bbox, confidence)| -> Result<FaceObservation, PerceptionError> {
                Ok(FaceObservation {
                    pose: self.estimate_pose(frame, &bbox)?,
                    bbox,
                    confidence,
                })
            })
            .collect()
    }

    /// Estimate head pose from a face crop
    fn estimate_pose(&self, frame: &VideoFrame, bbox: &BoundingBox) -> Result<HeadPose, PerceptionError> {
        let Some(session) = &self.pose_session else {
            return Ok(HeadPose::default());
        };

        let crop = crop_face(frame, bbox)
            .ok_or_else(|| PerceptionError::ImageProcessing("Face crop outside frame".into()))?;
        let input = to_tensor(&crop, POSE_INPUT, POSE_INPUT, |p, c| {
            (p as f32 / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c]
        });
        let outputs = session
            .run(ort::inputs![input].map_err(inference)?)
            .map_err(inference)?;
        let angles: Vec<f32> = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(inference)?
            .iter()
            .copied()
            .collect();

        match angles.as_slice() {
            [yaw, pitch, roll, ..] => Ok(HeadPose {
                pitch: *pitch,
                yaw: *yaw,
                roll: *roll,
            }),
            _ => Err(PerceptionError::OutputShape(format!(
                "pose output has {} values",
                angles.len()
            ))),
        }
    }

    /// Detect phones, books, and people
    fn detect_objects(&self, frame: &VideoFrame) -> Result<Vec<DetectedObject>, PerceptionError> {
        let Some(session) = &self.object_session else {
            return Ok(Vec::new());
        };

        let input = to_tensor(frame, OBJECT_INPUT, OBJECT_INPUT, |p, _| p as f32 / 255.0);
        let outputs = session
            .run(ort::inputs![input].map_err(inference)?)
            .map_err(inference)?;
        let output = outputs[0].try_extract_tensor::<f32>().map_err(inference)?;
        let output = output
            .into_dimensionality::<Ix3>()
            .map_err(|e| PerceptionError::OutputShape(e.to_string()))?;

        let (rows, anchors) = (output.shape()[1], output.shape()[2]);
        if rows < MIN_OBJECT_ROWS {
            return Err(PerceptionError::OutputShape(format!(
                "object head has {} rows, expected COCO layout",
                rows
            )));
        }

        let sx = frame.width as f32 / OBJECT_INPUT as f32;
        let sy = frame.height as f32 / OBJECT_INPUT as f32;
        let mut candidates = Vec::new();
        for j in 0..anchors {
            let (class_id, score) = (4..rows)
                .map(|r| (r - 4, output[[0, r, j]]))
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .unwrap_or((0, 0.0));
            if score < self.config.object_confidence {
                continue;
            }
            let Some(class) = ObjectClass::from_coco(class_id) else {
                continue;
            };

            let (cx, cy, w, h) = (
                output[[0, 0, j]],
                output[[0, 1, j]],
                output[[0, 2, j]],
                output[[0, 3, j]],
            );
            candidates.push(DetectedObject {
                class,
                confidence: score,
                bbox: BoundingBox::new((cx - w / 2.0) * sx, (cy - h / 2.0) * sy, w * sx, h * sy),
            });
        }

        let mut objects = Vec::new();
        for class in [ObjectClass::Phone, ObjectClass::Book, ObjectClass::Person] {
            let of_class: Vec<_> = candidates.iter().filter(|o| o.class == class).cloned().collect();
            objects.extend(non_max_suppression(of_class, self.config.nms_iou, |o| {
                (o.bbox, o.confidence)
            }));
        }
        Ok(objects)
    }
}

impl PerceptionAdapter for OnnxPerception {
    fn detect(&self, frame: &VideoFrame) -> Result<PerceptionResult, PerceptionError> {
        let faces = self.detect_faces(frame)?;
        let objects = self.detect_objects(frame)?;
        debug!(
            "Frame {}: {} face(s), {} object(s)",
            frame.sequence,
            faces.len(),
            objects.len()
        );
        Ok(PerceptionResult { faces, objects })
    }

    fn models_loaded(&self) -> bool {
        self.face_session.is_some()
    }
}

fn load_session(path: &str, label: &str) -> Result<Session, PerceptionError> {
    info!("Loading {} model from {}", label, path);
    Session::builder()
        .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
        .and_then(|builder| builder.commit_from_file(path))
        .map_err(|e| {
            error!("Failed to load {} model: {}", label, e);
            PerceptionError::ModelLoad(e.to_string())
        })
}

fn inference(e: ort::Error) -> PerceptionError {
    PerceptionError::Inference(e.to_string())
}

/// Resize and pack a frame into a 1x3xHxW tensor
fn to_tensor(
    frame: &VideoFrame,
    width: u32,
    height: u32,
    normalize: impl Fn(u8, usize) -> f32,
) -> Array4<f32> {
    let resized = frame.resize(width, height);
    let mut input = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (i, pixel) in resized.data.chunks_exact(3).enumerate() {
        let (y, x) = (i / width as usize, i % width as usize);
        for c in 0..3 {
            input[[0, c, y, x]] = normalize(pixel[c], c);
        }
    }
    input
}

fn crop_face(frame: &VideoFrame, bbox: &BoundingBox) -> Option<VideoFrame> {
    if frame.width == 0 || frame.height == 0 {
        return None;
    }
    let image: image::RgbImage = image::buffer::ConvertBuffer::convert(&frame.as_image()?);
    let x = (bbox.x.max(0.0) as u32).min(frame.width - 1);
    let y = (bbox.y.max(0.0) as u32).min(frame.height - 1);
    let w = (bbox.width.max(1.0) as u32).min(frame.width - x).max(1);
    let h = (bbox.height.max(1.0) as u32).min(frame.height - y).max(1);
    Some(VideoFrame::from(image::imageops::crop_imm(&image, x, y, w, h).to_image()))
}

fn mock_face(frame: &VideoFrame) -> FaceObservation {
    FaceObservation {
        bbox: BoundingBox::new(
            frame.width as f32 * 0.3,
            frame.height as f32 * 0.2,
            frame.width as f32 * 0.4,
            frame.height as f32 * 0.5,
        ),
        pose: HeadPose::default(),
        confidence: 0.95,
    }
}
