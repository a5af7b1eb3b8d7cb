//! Session engine: perception dispatch, session lifecycle, event fan-out

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use evidence::EvidenceStore;
use frame_codec::VideoFrame;
use metrics::{counter, gauge, histogram};
use perception::{HeadPose, PerceptionAdapter, PerceptionResult};
use serde::Serialize;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    calibrate_from, environment, evidence as policy, Baseline, CalibrationFailure,
    CalibrationOutcome, EnvironmentReport, EvidenceArtifact, FrameRequest, ProctorConfig,
    ProctorError, SessionHandle, SessionSnapshot, SessionStore, UnknownSessionPolicy,
    ViolationClassifier, ViolationEvent,
};

/// Result of processing one frame
#[derive(Debug, Clone, Serialize)]
pub struct FrameOutcome {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub violations: Vec<ViolationEvent>,
    pub face_count: usize,
    pub no_person: bool,
    pub multiple_faces: bool,
    pub looking_away: bool,
    pub phone_detected: bool,
    pub book_detected: bool,
    pub head_pose: Option<HeadPose>,
    pub evidence: Option<EvidenceArtifact>,
    /// Perception did not answer; the frame was classified as empty
    pub degraded: bool,
}

/// Result of processing one audio level sample
#[derive(Debug, Clone, Serialize)]
pub struct AudioOutcome {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: f32,
    pub violations: Vec<ViolationEvent>,
}

/// Proctoring engine
///
/// Owns the session store; every caller shares one instance behind an `Arc`.
pub struct ProctorEngine {
    config: Arc<ProctorConfig>,
    perception: Arc<dyn PerceptionAdapter>,
    sessions: SessionStore,
    classifier: ViolationClassifier,
    workers: Arc<Semaphore>,
    evidence_store: Option<Arc<dyn EvidenceStore>>,
}

/// Engine clock; follows the tokio clock so paused-time tests can drive cooldowns
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

impl ProctorEngine {
    pub fn new(config: ProctorConfig, perception: Arc<dyn PerceptionAdapter>) -> Self {
        let config = Arc::new(config);
        let workers = config.worker_count();
        info!(
            "Proctor engine ready: {} perception worker(s), {}ms timeout, models loaded: {}",
            workers,
            config.perception_timeout_ms,
            perception.models_loaded()
        );
        Self {
            sessions: SessionStore::new(config.event_channel_capacity),
            classifier: ViolationClassifier::new(config.clone()),
            workers: Arc::new(Semaphore::new(workers)),
            evidence_store: None,
            perception,
            config,
        }
    }

    /// Submit evidence artifacts to `store`
    pub fn with_evidence_store(mut self, store: Arc<dyn EvidenceStore>) -> Self {
        self.evidence_store = Some(store);
        self
    }

    pub fn config(&self) -> &ProctorConfig {
        &self.config
    }

    pub fn models_loaded(&self) -> bool {
        self.perception.models_loaded()
    }

    /// Run perception on a blocking worker, bounded by the worker pool and timeout
    async fn perceive(&self, frame: Arc<VideoFrame>) -> Result<PerceptionResult, ProctorError> {
        let permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ProctorError::Perception(e.to_string()))?;

        let perception = self.perception.clone();
        let started = Instant::now();
        // The permit lives as long as the blocking call, even past a timeout
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            perception.detect(&frame)
        });

        let timeout = self.config.perception_timeout();
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(result))) => {
                histogram!("proctor_perception_latency_ms")
                    .record(started.elapsed().as_secs_f64() * 1000.0);
                Ok(result)
            }
            Ok(Ok(Err(e))) => {
                counter!("proctor_perception_failures_total").increment(1);
                Err(ProctorError::Perception(e.to_string()))
            }
            Ok(Err(e)) => {
                counter!("proctor_perception_failures_total").increment(1);
                Err(ProctorError::Perception(format!("Worker failed: {}", e)))
            }
            Err(_) => {
                counter!("proctor_perception_timeouts_total").increment(1);
                Err(ProctorError::PerceptionTimeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Single-shot calibration; touches no session
    pub async fn calibrate(&self, frame: VideoFrame) -> CalibrationOutcome {
        match self.perceive(Arc::new(frame)).await {
            Ok(result) => calibrate_from(&result),
            Err(e) => {
                warn!("Calibration perception failed: {}", e);
                CalibrationOutcome::Failed(CalibrationFailure::Perception(e.to_string()))
            }
        }
    }

    /// Calibrate and store the baseline on a session, creating it if needed
    pub async fn calibrate_session(&self, session_id: &str, frame: VideoFrame) -> CalibrationOutcome {
        let outcome = self.calibrate(frame).await;
        if let Some(baseline) = outcome.baseline() {
            self.recalibrate(session_id, baseline).await;
        }
        outcome
    }

    /// Replace a session's baseline, creating the session if needed
    pub async fn recalibrate(&self, session_id: &str, baseline: Baseline) {
        let (handle, created) = self
            .sessions
            .get_or_create(session_id, now(), |s| s.baseline = Some(baseline))
            .await;
        if created {
            self.update_session_gauge().await;
        } else {
            handle.lock().await.recalibrate(baseline);
        }
    }

    /// Lighting, presence, and centering check; never fails
    pub async fn check_environment(&self, frame: VideoFrame) -> EnvironmentReport {
        let frame = Arc::new(frame);
        let perception = match self.perceive(frame.clone()).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!("Environment check perception failed: {}", e);
                None
            }
        };
        environment::assess(&frame, perception.as_ref(), &self.config)
    }

    async fn resolve_session(&self, request: &FrameRequest) -> Result<SessionHandle, ProctorError> {
        if let Some(handle) = self.sessions.get(&request.session_id).await {
            return Ok(handle);
        }

        if self.config.unknown_session == UnknownSessionPolicy::Reject && request.baseline.is_none() {
            return Err(ProctorError::UnknownSession(request.session_id.clone()));
        }

        let (handle, created) = self
            .sessions
            .get_or_create(&request.session_id, now(), |s| {
                // Without a baseline the session stays uncalibrated until one arrives
                s.baseline = request.baseline;
                s.student_id = request.student_id.clone();
            })
            .await;
        if created {
            self.update_session_gauge().await;
        }
        Ok(handle)
    }

    /// Classify one frame for a session
    pub async fn process_frame(
        &self,
        request: FrameRequest,
        frame: VideoFrame,
    ) -> Result<FrameOutcome, ProctorError> {
        let handle = self.resolve_session(&request).await?;
        {
            // Keep the session off the idle sweep while perception runs
            let mut state = handle.lock().await;
            if state.closed {
                return Err(ProctorError::SessionClosed(request.session_id));
            }
            state.last_activity = now();
        }
        counter!("proctor_frames_total").increment(1);

        let frame = Arc::new(frame);
        let (result, degraded) = match self.perceive(frame.clone()).await {
            Ok(result) => (result, false),
            Err(e) => {
                warn!("Session {}: {}; classifying as empty frame", request.session_id, e);
                (PerceptionResult::default(), true)
            }
        };

        let mut state = handle.lock().await;
        if state.closed {
            return Err(ProctorError::SessionClosed(request.session_id));
        }
        if let Some(baseline) = request.baseline {
            if !state.ensure_baseline(baseline) && state.baseline != Some(baseline) {
                debug!(
                    "Session {}: ignoring request baseline, session is already calibrated",
                    state.session_id
                );
            }
        }
        if state.student_id.is_none() {
            state.student_id = request.student_id.clone();
        }

        let mut assessment = self.classifier.classify_frame(&mut state, &result, now());
        let student_id = state.student_id.clone();
        drop(state);

        let evidence = self
            .capture_evidence(frame, &request.session_id, &mut assessment.events)
            .await;
        {
            let state = handle.lock().await;
            if !state.closed {
                state.publish(&assessment.events);
            }
        }

        for event in &assessment.events {
            counter!("proctor_violations_total", "kind" => event.kind.as_str()).increment(1);
            info!(
                "Session {}: {} ({})",
                request.session_id,
                event.kind,
                event.severity.as_str()
            );
        }
        if let Some(artifact) = &evidence {
            self.submit_evidence(artifact, student_id.as_deref());
        }

        let signals = assessment.signals;
        Ok(FrameOutcome {
            session_id: request.session_id,
            timestamp: Utc::now(),
            violations: assessment.events,
            face_count: signals.face_count,
            no_person: signals.no_person,
            multiple_faces: signals.multiple_faces,
            looking_away: signals.looking_away,
            phone_detected: signals.phone_detected,
            book_detected: signals.book_detected,
            head_pose: signals.head_pose,
            evidence,
            degraded,
        })
    }

    /// Classify one audio level sample for a session
    pub async fn process_audio(&self, session_id: &str, level: f32) -> Result<AudioOutcome, ProctorError> {
        let handle = self.resolve_session(&FrameRequest::new(session_id)).await?;

        let mut state = handle.lock().await;
        if state.closed {
            return Err(ProctorError::SessionClosed(session_id.to_string()));
        }
        let violations = self.classifier.classify_audio(&mut state, level, now());
        state.publish(&violations);
        drop(state);

        for event in &violations {
            counter!("proctor_violations_total", "kind" => event.kind.as_str()).increment(1);
            info!("Session {}: {} (level {:.1})", session_id, event.kind, level);
        }

        Ok(AudioOutcome {
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            level,
            violations,
        })
    }

    /// JPEG-encode the frame off the runtime threads when an event needs evidence
    async fn capture_evidence(
        &self,
        frame: Arc<VideoFrame>,
        session_id: &str,
        events: &mut Vec<ViolationEvent>,
    ) -> Option<EvidenceArtifact> {
        if !events.iter().any(|e| policy::is_evidentiary(e.kind)) {
            return None;
        }

        let quality = self.config.evidence_jpeg_quality;
        let sid = session_id.to_string();
        let mut linked = events.clone();
        let encoded = tokio::task::spawn_blocking(move || {
            let artifact = policy::capture(&frame, &sid, &mut linked, quality);
            (linked, artifact)
        })
        .await;

        match encoded {
            Ok((linked, artifact)) => {
                *events = linked;
                artifact
            }
            Err(e) => {
                error!("Evidence encoding task failed for session {}: {}", session_id, e);
                None
            }
        }
    }

    fn submit_evidence(&self, artifact: &EvidenceArtifact, student_id: Option<&str>) {
        let Some(store) = self.evidence_store.clone() else {
            return;
        };
        let uploads = artifact.uploads(student_id);
        tokio::task::spawn_blocking(move || {
            for upload in uploads {
                match store.store(&upload) {
                    Ok(url) => debug!("Evidence stored at {}", url),
                    Err(e) => {
                        counter!("proctor_evidence_failures_total").increment(1);
                        error!("Evidence upload {} failed: {}", upload.object_name(), e);
                    }
                }
            }
        });
    }

    /// Live event feed for a session
    pub async fn subscribe(&self, session_id: &str) -> Option<broadcast::Receiver<ViolationEvent>> {
        let handle = self.sessions.get(session_id).await?;
        let state = handle.lock().await;
        Some(state.subscribe())
    }

    /// Tear down a session; frames arriving afterwards are rejected or start a new session
    pub async fn end_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id).await;
        if removed {
            self.update_session_gauge().await;
        }
        removed
    }

    /// Remove sessions idle past the configured timeout
    pub async fn evict_idle(&self) -> Vec<String> {
        let Some(max_idle) = self.config.session_idle_timeout() else {
            return Vec::new();
        };
        let evicted = self.sessions.evict_idle(max_idle, now()).await;
        if !evicted.is_empty() {
            self.update_session_gauge().await;
        }
        evicted
    }

    /// Periodically evict idle sessions
    pub fn spawn_evictor(self: Arc<Self>, period: Duration) -> Option<JoinHandle<()>> {
        self.config.session_idle_timeout()?;
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let evicted = self.evict_idle().await;
                for id in evicted {
                    debug!("Session {} evicted after idle timeout", id);
                }
            }
        }))
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.len().await
    }

    pub async fn session_snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        let handle = self.sessions.get(session_id).await?;
        let state = handle.lock().await;
        Some(state.snapshot(&self.config, now()))
    }

    async fn update_session_gauge(&self) {
        gauge!("proctor_active_sessions").set(self.sessions.len().await as f64);
    }
}
