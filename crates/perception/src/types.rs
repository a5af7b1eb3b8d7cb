//! Perception result types (faces, head pose, objects)

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Build from corner coordinates
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1.min(x2),
            y: y1.min(y2),
            width: (x2 - x1).abs(),
            height: (y2 - y1).abs(),
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Head pose (Euler angles)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeadPose {
    /// Pitch (up-down tilt) in degrees
    pub pitch: f32,
    /// Yaw (left-right rotation) in degrees
    pub yaw: f32,
    /// Roll (side tilt) in degrees
    pub roll: f32,
}

impl HeadPose {
    pub fn new(pitch: f32, yaw: f32) -> Self {
        Self {
            pitch,
            yaw,
            roll: 0.0,
        }
    }
}

/// A detected face with its head pose estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    pub bbox: BoundingBox,
    pub pose: HeadPose,
    pub confidence: f32,
}

impl FaceObservation {
    /// Face with the given pose and a nominal bounding box
    pub fn with_pose(pitch: f32, yaw: f32) -> Self {
        Self {
            bbox: BoundingBox::default(),
            pose: HeadPose::new(pitch, yaw),
            confidence: 1.0,
        }
    }
}

/// Object classes relevant to exam integrity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Phone,
    Book,
    Person,
}

impl ObjectClass {
    /// Map a COCO-80 class index onto the classes we track
    pub fn from_coco(class_id: usize) -> Option<Self> {
        match class_id {
            0 => Some(ObjectClass::Person),
            67 => Some(ObjectClass::Phone),
            73 => Some(ObjectClass::Book),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectClass::Phone => "phone",
            ObjectClass::Book => "book",
            ObjectClass::Person => "person",
        }
    }
}

/// Detected object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    /// Object class
    pub class: ObjectClass,

    /// Detection confidence (0-1)
    pub confidence: f32,

    /// Bounding box
    pub bbox: BoundingBox,
}

impl DetectedObject {
    pub fn new(class: ObjectClass, confidence: f32) -> Self {
        Self {
            class,
            confidence,
            bbox: BoundingBox::default(),
        }
    }
}

/// Output of one perception pass over a frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerceptionResult {
    pub faces: Vec<FaceObservation>,
    pub objects: Vec<DetectedObject>,
}

impl PerceptionResult {
    pub fn new(faces: Vec<FaceObservation>, objects: Vec<DetectedObject>) -> Self {
        Self { faces, objects }
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Highest-confidence object of a class
    pub fn best_object(&self, class: ObjectClass) -> Option<&DetectedObject> {
        self.objects
            .iter()
            .filter(|o| o.class == class)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }
}

/// Greedy non-maximum suppression; keeps the highest-confidence box of each overlap cluster
pub(crate) fn non_max_suppression<T, F>(mut items: Vec<T>, iou_threshold: f32, key: F) -> Vec<T>
where
    F: Fn(&T) -> (BoundingBox, f32),
{
    items.sort_by(|a, b| key(b).1.total_cmp(&key(a).1));
    let mut kept: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        let (bbox, _) = key(&item);
        if kept.iter().all(|k| key(k).0.iou(&bbox) < iou_threshold) {
            kept.push(item);
        }
    }
    kept
}
