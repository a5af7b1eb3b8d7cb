//! Violation kinds, severities, and events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// Exam integrity violation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// No face in frame
    NoPerson,
    /// More than one face in frame
    MultipleFaces,
    /// Head pose deviates from the calibrated baseline
    LookingAway,
    /// Phone visible
    PhoneDetected,
    /// Book or notes visible
    BookDetected,
    /// Audio level above threshold
    ExcessiveNoise,
}

impl ViolationKind {
    /// Kinds evaluated on every video frame, in evaluation order
    pub const FRAME_KINDS: [ViolationKind; 5] = [
        ViolationKind::NoPerson,
        ViolationKind::MultipleFaces,
        ViolationKind::LookingAway,
        ViolationKind::PhoneDetected,
        ViolationKind::BookDetected,
    ];

    pub const ALL: [ViolationKind; 6] = [
        ViolationKind::NoPerson,
        ViolationKind::MultipleFaces,
        ViolationKind::LookingAway,
        ViolationKind::PhoneDetected,
        ViolationKind::BookDetected,
        ViolationKind::ExcessiveNoise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::NoPerson => "no_person",
            ViolationKind::MultipleFaces => "multiple_faces",
            ViolationKind::LookingAway => "looking_away",
            ViolationKind::PhoneDetected => "phone_detected",
            ViolationKind::BookDetected => "book_detected",
            ViolationKind::ExcessiveNoise => "excessive_noise",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ViolationKind::NoPerson
            | ViolationKind::MultipleFaces
            | ViolationKind::PhoneDetected => Severity::High,
            ViolationKind::LookingAway
            | ViolationKind::BookDetected
            | ViolationKind::ExcessiveNoise => Severity::Medium,
        }
    }

    /// Default human-readable message
    pub fn message(&self) -> &'static str {
        match self {
            ViolationKind::NoPerson => "No person detected in frame",
            ViolationKind::MultipleFaces => "Multiple faces detected in frame",
            ViolationKind::LookingAway => "Student looking away from screen",
            ViolationKind::PhoneDetected => "Mobile phone detected",
            ViolationKind::BookDetected => "Book or notes detected",
            ViolationKind::ExcessiveNoise => "Excessive background noise detected",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An emitted violation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: ViolationKind,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Evidence artifact captured for this event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

impl ViolationEvent {
    pub fn new(kind: ViolationKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity: kind.severity(),
            message: kind.message().to_string(),
            confidence: None,
            evidence_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}
