//! Evidence snapshot policy

use chrono::{DateTime, Utc};
use evidence::EvidenceUpload;
use frame_codec::VideoFrame;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::{ViolationEvent, ViolationKind};

/// Whether a violation kind requires the triggering frame to be preserved
pub fn is_evidentiary(kind: ViolationKind) -> bool {
    match kind {
        ViolationKind::MultipleFaces
        | ViolationKind::PhoneDetected
        | ViolationKind::BookDetected
        | ViolationKind::NoPerson => true,
        ViolationKind::LookingAway | ViolationKind::ExcessiveNoise => false,
    }
}

/// A preserved frame tied to one or more violation events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceArtifact {
    pub id: Uuid,
    pub session_id: String,
    pub kinds: Vec<ViolationKind>,
    pub captured_at: DateTime<Utc>,
    /// JPEG bytes
    #[serde(skip)]
    pub jpeg: Vec<u8>,
}

impl EvidenceArtifact {
    /// One store upload per evidentiary kind
    pub fn uploads(&self, student_id: Option<&str>) -> Vec<EvidenceUpload> {
        self.kinds
            .iter()
            .map(|kind| EvidenceUpload {
                id: self.id,
                session_id: self.session_id.clone(),
                student_id: student_id.map(str::to_string),
                kind: kind.as_str().to_string(),
                captured_at: self.captured_at,
                jpeg: self.jpeg.clone(),
            })
            .collect()
    }
}

/// Encode the frame once if any event needs evidence, and link those events to it.
///
/// An encoding failure is logged and the events go out without evidence.
pub fn capture(
    frame: &VideoFrame,
    session_id: &str,
    events: &mut [ViolationEvent],
    jpeg_quality: u8,
) -> Option<EvidenceArtifact> {
    let kinds: Vec<ViolationKind> = events
        .iter()
        .map(|e| e.kind)
        .filter(|&k| is_evidentiary(k))
        .collect();
    if kinds.is_empty() {
        return None;
    }

    let jpeg = match frame_codec::encode_jpeg(frame, jpeg_quality) {
        Ok(jpeg) => jpeg,
        Err(e) => {
            warn!("Evidence capture failed for session {}: {}", session_id, e);
            return None;
        }
    };

    let id = Uuid::new_v4();
    for event in events.iter_mut().filter(|e| is_evidentiary(e.kind)) {
        event.evidence_id = Some(id);
    }

    Some(EvidenceArtifact {
        id,
        session_id: session_id.to_string(),
        kinds,
        captured_at: Utc::now(),
        jpeg,
    })
}
