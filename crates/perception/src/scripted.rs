//! Scripted perception for tests and offline replays

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use frame_codec::VideoFrame;

use crate::{PerceptionAdapter, PerceptionError, PerceptionResult};

/// Replays queued results in order, then falls back to a fixed result
pub struct ScriptedPerception {
    queue: Mutex<VecDeque<PerceptionResult>>,
    fallback: PerceptionResult,
    delay: Option<Duration>,
}

impl ScriptedPerception {
    /// Always answer with `fallback`
    pub fn constant(fallback: PerceptionResult) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
        }
    }

    /// Answer with `results` in order, then with an empty result
    pub fn sequence(results: impl IntoIterator<Item = PerceptionResult>) -> Self {
        Self {
            queue: Mutex::new(results.into_iter().collect()),
            fallback: PerceptionResult::default(),
            delay: None,
        }
    }

    /// Block each call for `delay` (simulates a slow model)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue another result
    pub fn push(&self, result: PerceptionResult) -> Result<(), PerceptionError> {
        self.queue
            .lock()
            .map_err(|e| PerceptionError::Inference(format!("Lock error: {}", e)))?
            .push_back(result);
        Ok(())
    }
}

impl PerceptionAdapter for ScriptedPerception {
    fn detect(&self, _frame: &VideoFrame) -> Result<PerceptionResult, PerceptionError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let next = self
            .queue
            .lock()
            .map_err(|e| PerceptionError::Inference(format!("Lock error: {}", e)))?
            .pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FaceObservation;

    #[test]
    fn test_sequence_then_empty() {
        let frame = VideoFrame::solid(2, 2, [0, 0, 0]);
        let one_face = PerceptionResult::new(vec![FaceObservation::with_pose(1.0, 2.0)], vec![]);
        let adapter = ScriptedPerception::sequence(vec![one_face.clone()]);

        assert_eq!(adapter.detect(&frame).unwrap(), one_face);
        assert_eq!(adapter.detect(&frame).unwrap().face_count(), 0);

        adapter.push(one_face).unwrap();
        assert_eq!(adapter.detect(&frame).unwrap().face_count(), 1);
    }

    #[test]
    fn test_constant() {
        let frame = VideoFrame::solid(2, 2, [0, 0, 0]);
        let adapter = ScriptedPerception::constant(PerceptionResult::new(
            vec![FaceObservation::with_pose(0.0, 0.0); 2],
            vec![],
        ));
        for _ in 0..3 {
            assert_eq!(adapter.detect(&frame).unwrap().face_count(), 2);
        }
        assert!(!adapter.models_loaded());
    }
}
