//! Evidence Storage Layer
//!
//! Persists violation snapshots for later audit. The proctor engine hands
//! uploads over fire-and-forget; stores report failures through their own
//! logging and return values, never back into frame processing.

mod store;

pub use store::{LocalEvidenceStore, MemoryEvidenceStore, StoredEvidence};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Evidence storage errors
#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Lock error: {0}")]
    Lock(String),
    #[error("Empty evidence payload")]
    EmptyPayload,
}

/// A snapshot ready to be persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceUpload {
    /// Artifact id; its short form keeps same-second names apart
    pub id: Uuid,
    pub session_id: String,
    pub student_id: Option<String>,
    /// Violation kind label, e.g. `phone_detected`
    pub kind: String,
    pub captured_at: DateTime<Utc>,
    /// JPEG bytes
    #[serde(skip)]
    pub jpeg: Vec<u8>,
}

impl EvidenceUpload {
    /// New upload captured now with a fresh id
    pub fn new(
        session_id: impl Into<String>,
        student_id: Option<String>,
        kind: impl Into<String>,
        jpeg: Vec<u8>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            student_id,
            kind: kind.into(),
            captured_at: Utc::now(),
            jpeg,
        }
    }

    /// Object name: `{session}/{student}_{kind}_{YYYYmmdd_HHMMSS}_{id8}.jpg`
    pub fn object_name(&self) -> String {
        let id = self.id.simple().to_string();
        format!(
            "{}/{}_{}_{}_{}.jpg",
            sanitize(&self.session_id),
            sanitize(self.student_id.as_deref().unwrap_or("unknown")),
            sanitize(&self.kind),
            self.captured_at.format("%Y%m%d_%H%M%S"),
            &id[..8]
        )
    }
}

/// Destination for evidence snapshots
pub trait EvidenceStore: Send + Sync {
    /// Persist one snapshot and return its URL
    fn store(&self, upload: &EvidenceUpload) -> Result<String, EvidenceError>;
}

/// Keep object names to a safe character set
fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}
