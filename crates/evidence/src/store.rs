//! Evidence store implementations

use crate::{EvidenceError, EvidenceStore, EvidenceUpload};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Writes snapshots under a root directory and returns `file://` URLs
pub struct LocalEvidenceStore {
    root: PathBuf,
}

impl LocalEvidenceStore {
    /// Create a store rooted at `root` (created if missing)
    pub fn new(root: impl AsRef<Path>) -> Result<Self, EvidenceError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        info!("Evidence store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl EvidenceStore for LocalEvidenceStore {
    fn store(&self, upload: &EvidenceUpload) -> Result<String, EvidenceError> {
        if upload.jpeg.is_empty() {
            return Err(EvidenceError::EmptyPayload);
        }

        let path = self.root.join(upload.object_name());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &upload.jpeg)?;

        debug!("Stored {} bytes of evidence at {}", upload.jpeg.len(), path.display());
        Ok(format!("file://{}", path.display()))
    }
}

/// Evidence record kept by the in-memory store
#[derive(Debug, Clone)]
pub struct StoredEvidence {
    pub name: String,
    pub kind: String,
    pub session_id: String,
    pub captured_at: DateTime<Utc>,
    pub size_bytes: usize,
}

/// Bounded in-memory store (oldest records evicted first)
pub struct MemoryEvidenceStore {
    records: Mutex<VecDeque<StoredEvidence>>,
    max_records: usize,
}

impl MemoryEvidenceStore {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(max_records.min(1024))),
            max_records: max_records.max(1),
        }
    }

    /// Most recent records first
    pub fn recent(&self, limit: usize) -> Result<Vec<StoredEvidence>, EvidenceError> {
        let records = self
            .records
            .lock()
            .map_err(|e| EvidenceError::Lock(e.to_string()))?;
        Ok(records.iter().rev().take(limit).cloned().collect())
    }

    /// Records for one session
    pub fn for_session(&self, session_id: &str) -> Result<Vec<StoredEvidence>, EvidenceError> {
        let records = self
            .records
            .lock()
            .map_err(|e| EvidenceError::Lock(e.to_string()))?;
        Ok(records
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryEvidenceStore {
    fn default() -> Self {
        Self::new(1_000)
    }
}

impl EvidenceStore for MemoryEvidenceStore {
    fn store(&self, upload: &EvidenceUpload) -> Result<String, EvidenceError> {
        if upload.jpeg.is_empty() {
            return Err(EvidenceError::EmptyPayload);
        }

        let mut records = self
            .records
            .lock()
            .map_err(|e| EvidenceError::Lock(e.to_string()))?;

        // Enforce retention
        while records.len() >= self.max_records {
            records.pop_front();
        }

        let name = upload.object_name();
        records.push_back(StoredEvidence {
            name: name.clone(),
            kind: upload.kind.clone(),
            session_id: upload.session_id.clone(),
            captured_at: upload.captured_at,
            size_bytes: upload.jpeg.len(),
        });
        Ok(format!("memory://{}", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(session: &str, kind: &str) -> EvidenceUpload {
        EvidenceUpload::new(
            session,
            Some("student-1".to_string()),
            kind,
            vec![0xFF, 0xD8, 0xFF],
        )
    }

    #[test]
    fn test_local_store_writes_file() {
        let root = std::env::temp_dir().join(format!("evidence-test-{}", uuid::Uuid::new_v4()));
        let store = LocalEvidenceStore::new(&root).unwrap();

        let url = store.store(&upload("exam-1", "phone_detected")).unwrap();
        assert!(url.starts_with("file://"));

        let path = PathBuf::from(url.trim_start_matches("file://"));
        assert_eq!(std::fs::read(&path).unwrap(), vec![0xFF, 0xD8, 0xFF]);
        assert!(path.starts_with(store.root()));

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_local_store_keeps_same_second_snapshots() {
        let root = std::env::temp_dir().join(format!("evidence-test-{}", uuid::Uuid::new_v4()));
        let store = LocalEvidenceStore::new(&root).unwrap();

        let first = upload("exam-1", "phone_detected");
        let mut second = upload("exam-1", "phone_detected");
        second.captured_at = first.captured_at;
        second.jpeg = vec![0xFF, 0xD8, 0x00];

        let a = store.store(&first).unwrap();
        let b = store.store(&second).unwrap();
        assert_ne!(a, b);
        assert_eq!(std::fs::read(a.trim_start_matches("file://")).unwrap(), first.jpeg);
        assert_eq!(std::fs::read(b.trim_start_matches("file://")).unwrap(), second.jpeg);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_empty_payload_rejected() {
        let store = MemoryEvidenceStore::default();
        let mut empty = upload("exam-1", "no_person");
        empty.jpeg.clear();
        assert!(matches!(store.store(&empty), Err(EvidenceError::EmptyPayload)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_store_retention() {
        let store = MemoryEvidenceStore::new(3);
        for i in 0..5 {
            store.store(&upload(&format!("exam-{}", i), "book_detected")).unwrap();
        }
        assert_eq!(store.len(), 3);

        let recent = store.recent(10).unwrap();
        assert_eq!(recent[0].session_id, "exam-4");
        assert_eq!(recent[2].session_id, "exam-2");
        assert_eq!(store.for_session("exam-0").unwrap().len(), 0);
        assert_eq!(store.for_session("exam-3").unwrap()[0].size_bytes, 3);
    }
}
