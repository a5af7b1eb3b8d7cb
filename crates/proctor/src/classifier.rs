//! Debounced violation classification

use perception::{HeadPose, ObjectClass, PerceptionResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::state::SessionState;
use crate::{ProctorConfig, ViolationEvent, ViolationKind};

/// Raw (undebounced) conditions observed in one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameSignals {
    pub face_count: usize,
    pub no_person: bool,
    pub multiple_faces: bool,
    pub looking_away: bool,
    pub phone_detected: bool,
    pub book_detected: bool,
    /// Pose of the single visible face
    pub head_pose: Option<HeadPose>,
    /// Best phone detection confidence
    pub phone_confidence: Option<f32>,
    /// Best book detection confidence
    pub book_confidence: Option<f32>,
    /// Per-axis deviation (pitch, yaw) from the baseline
    pub gaze_deviation: Option<(f32, f32)>,
}

impl FrameSignals {
    /// Extract per-frame conditions from a perception result
    pub fn extract(
        result: &PerceptionResult,
        baseline: Option<crate::Baseline>,
        config: &ProctorConfig,
    ) -> Self {
        let face_count = result.face_count();
        let head_pose = match result.faces.as_slice() {
            [face] => Some(face.pose),
            _ => None,
        };

        // Gaze is only meaningful with a single subject and a baseline
        let gaze_deviation = head_pose
            .zip(baseline)
            .map(|(pose, base)| base.deviation(pose.pitch, pose.yaw));
        let looking_away = gaze_deviation
            .map(|(dp, dy)| dp > config.pitch_threshold_deg || dy > config.yaw_threshold_deg)
            .unwrap_or(false);

        let phone_confidence = result
            .best_object(ObjectClass::Phone)
            .map(|o| o.confidence)
            .filter(|&c| c >= config.phone_confidence);
        let book_confidence = result
            .best_object(ObjectClass::Book)
            .map(|o| o.confidence)
            .filter(|&c| c >= config.book_confidence);

        Self {
            face_count,
            no_person: face_count == 0,
            multiple_faces: face_count > 1,
            looking_away,
            phone_detected: phone_confidence.is_some(),
            book_detected: book_confidence.is_some(),
            head_pose,
            phone_confidence,
            book_confidence,
            gaze_deviation,
        }
    }

    pub fn is_active(&self, kind: ViolationKind) -> bool {
        match kind {
            ViolationKind::NoPerson => self.no_person,
            ViolationKind::MultipleFaces => self.multiple_faces,
            ViolationKind::LookingAway => self.looking_away,
            ViolationKind::PhoneDetected => self.phone_detected,
            ViolationKind::BookDetected => self.book_detected,
            ViolationKind::ExcessiveNoise => false,
        }
    }

    /// Build the event for a kind that just fired
    fn event(&self, kind: ViolationKind) -> ViolationEvent {
        let event = ViolationEvent::new(kind);
        match kind {
            ViolationKind::MultipleFaces => event
                .with_confidence(self.face_count as f32)
                .with_message(format!("Multiple faces detected ({})", self.face_count)),
            ViolationKind::LookingAway => match self.gaze_deviation {
                Some((dp, dy)) => event.with_message(format!(
                    "Student looking away from screen (pitch {:.1}°, yaw {:.1}° off baseline)",
                    dp, dy
                )),
                None => event,
            },
            ViolationKind::PhoneDetected => match self.phone_confidence {
                Some(c) => event.with_confidence(c),
                None => event,
            },
            ViolationKind::BookDetected => match self.book_confidence {
                Some(c) => event.with_confidence(c),
                None => event,
            },
            ViolationKind::NoPerson | ViolationKind::ExcessiveNoise => event,
        }
    }
}

/// Result of classifying one frame
#[derive(Debug, Clone, Default)]
pub struct FrameAssessment {
    pub signals: FrameSignals,
    pub events: Vec<ViolationEvent>,
}

/// Stateful decision function: perception output + session state → violation events
#[derive(Debug, Clone)]
pub struct ViolationClassifier {
    config: Arc<ProctorConfig>,
}

impl ViolationClassifier {
    pub fn new(config: Arc<ProctorConfig>) -> Self {
        Self { config }
    }

    /// Classify one frame for a session, updating its debounce state
    pub fn classify_frame(
        &self,
        state: &mut SessionState,
        result: &PerceptionResult,
        now: Instant,
    ) -> FrameAssessment {
        let signals = FrameSignals::extract(result, state.baseline, &self.config);

        let mut events = Vec::new();
        for kind in ViolationKind::FRAME_KINDS {
            let policy = self.config.policy(kind);
            if state.alerts.observe(kind, signals.is_active(kind), &policy, now) {
                events.push(signals.event(kind));
            }
        }

        state.frames_processed += 1;
        state.violation_count += events.len();
        state.last_activity = now;

        if !events.is_empty() {
            debug!(
                "Session {} frame {}: {} violation(s)",
                state.session_id,
                state.frames_processed,
                events.len()
            );
        }

        FrameAssessment { signals, events }
    }

    /// Classify one audio level sample
    pub fn classify_audio(
        &self,
        state: &mut SessionState,
        level: f32,
        now: Instant,
    ) -> Vec<ViolationEvent> {
        let kind = ViolationKind::ExcessiveNoise;
        let active = level > self.config.noise_threshold;
        let policy = self.config.policy(kind);

        state.last_activity = now;
        if state.alerts.observe(kind, active, &policy, now) {
            state.violation_count += 1;
            vec![ViolationEvent::new(kind).with_confidence(level)]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Baseline, Severity};
    use perception::{DetectedObject, FaceObservation};
    use proptest::prelude::*;
    use std::time::Duration;

    fn classifier(config: ProctorConfig) -> ViolationClassifier {
        ViolationClassifier::new(Arc::new(config))
    }

    fn session(baseline: Baseline) -> SessionState {
        let mut state = SessionState::new("exam", 16, Instant::now());
        state.baseline = Some(baseline);
        state
    }

    fn face(pitch: f32, yaw: f32) -> PerceptionResult {
        PerceptionResult::new(vec![FaceObservation::with_pose(pitch, yaw)], vec![])
    }

    fn kinds(events: &[ViolationEvent]) -> Vec<ViolationKind> {
        events.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_looking_away_scenario() {
        // Calibrated at (0, 0), threshold 15°, N = 3, yaw 20° for five frames
        let classifier = classifier(ProctorConfig::default());
        let mut state = session(Baseline::new(0.0, 0.0));
        let t0 = Instant::now();

        let per_frame: Vec<Vec<ViolationEvent>> = (0..5u64)
            .map(|i| {
                classifier
                    .classify_frame(&mut state, &face(0.0, 20.0), t0 + Duration::from_millis(200 * i))
                    .events
            })
            .collect();

        assert!(per_frame[0].is_empty());
        assert!(per_frame[1].is_empty());
        assert_eq!(kinds(&per_frame[2]), vec![ViolationKind::LookingAway]);
        assert_eq!(per_frame[2][0].severity, Severity::Medium);
        assert!(per_frame[3].is_empty());
        assert!(per_frame[4].is_empty());
        assert_eq!(state.violation_count, 1);
    }

    #[test]
    fn test_single_gaze_spike_never_fires() {
        let classifier = classifier(ProctorConfig::default());
        let mut state = session(Baseline::new(0.0, 0.0));
        let now = Instant::now();

        for result in [face(0.0, 0.0), face(0.0, 30.0), face(0.0, 0.0), face(2.0, -3.0)] {
            let assessment = classifier.classify_frame(&mut state, &result, now);
            assert!(assessment.events.is_empty());
        }
    }

    #[test]
    fn test_negative_frame_resets_gaze_count() {
        let classifier = classifier(ProctorConfig::default());
        let mut state = session(Baseline::new(0.0, 0.0));
        let now = Instant::now();

        classifier.classify_frame(&mut state, &face(20.0, 0.0), now);
        classifier.classify_frame(&mut state, &face(20.0, 0.0), now);
        assert_eq!(state.alerts.consecutive(ViolationKind::LookingAway), 2);

        classifier.classify_frame(&mut state, &face(0.0, 0.0), now);
        assert_eq!(state.alerts.consecutive(ViolationKind::LookingAway), 0);

        let fired: Vec<usize> = (0..3)
            .map(|_| classifier.classify_frame(&mut state, &face(20.0, 0.0), now).events.len())
            .collect();
        assert_eq!(fired, vec![0, 0, 1]);
    }

    #[test]
    fn test_deviation_is_relative_to_baseline() {
        let classifier = classifier(ProctorConfig::default());
        let mut state = session(Baseline::new(10.0, -20.0));
        let now = Instant::now();

        // 20° off on a raw scale but only 0°/5° off the baseline
        for _ in 0..5 {
            let assessment = classifier.classify_frame(&mut state, &face(10.0, -15.0), now);
            assert!(!assessment.signals.looking_away);
        }
        // Pitch axis alone can trigger
        let assessment = classifier.classify_frame(&mut state, &face(-6.0, -20.0), now);
        assert!(assessment.signals.looking_away);
        assert_eq!(assessment.signals.gaze_deviation, Some((16.0, 0.0)));
    }

    #[test]
    fn test_no_person_cooldown_idempotent() {
        let classifier = classifier(ProctorConfig::default());
        let mut state = session(Baseline::default());
        let t0 = Instant::now();
        let empty = PerceptionResult::default();

        let first = classifier.classify_frame(&mut state, &empty, t0).events;
        assert_eq!(kinds(&first), vec![ViolationKind::NoPerson]);
        assert_eq!(first[0].severity, Severity::High);

        for i in 1..10u64 {
            let events = classifier
                .classify_frame(&mut state, &empty, t0 + Duration::from_millis(400 * i))
                .events;
            assert!(events.is_empty());
        }

        // Cooldown (5s) elapsed while still absent: re-emit
        let again = classifier
            .classify_frame(&mut state, &empty, t0 + Duration::from_secs(5))
            .events;
        assert_eq!(kinds(&again), vec![ViolationKind::NoPerson]);
    }

    #[test]
    fn test_multiple_faces_confidence_is_count() {
        let classifier = classifier(ProctorConfig::default());
        let mut state = session(Baseline::default());
        let result = PerceptionResult::new(vec![FaceObservation::with_pose(0.0, 0.0); 3], vec![]);

        let assessment = classifier.classify_frame(&mut state, &result, Instant::now());
        assert_eq!(kinds(&assessment.events), vec![ViolationKind::MultipleFaces]);
        assert_eq!(assessment.events[0].confidence, Some(3.0));
        // Gaze is not judged with several faces
        assert!(assessment.signals.head_pose.is_none());
        assert!(!assessment.signals.looking_away);
    }

    #[test]
    fn test_object_thresholds() {
        let classifier = classifier(ProctorConfig::default());
        let mut state = session(Baseline::default());
        let now = Instant::now();

        let weak = PerceptionResult::new(
            vec![FaceObservation::with_pose(0.0, 0.0)],
            vec![DetectedObject::new(ObjectClass::Phone, 0.3)],
        );
        assert!(classifier.classify_frame(&mut state, &weak, now).events.is_empty());

        let strong = PerceptionResult::new(
            vec![FaceObservation::with_pose(0.0, 0.0)],
            vec![
                DetectedObject::new(ObjectClass::Phone, 0.3),
                DetectedObject::new(ObjectClass::Phone, 0.82),
                DetectedObject::new(ObjectClass::Book, 0.6),
                DetectedObject::new(ObjectClass::Person, 0.99),
            ],
        );
        let events = classifier.classify_frame(&mut state, &strong, now).events;
        assert_eq!(
            kinds(&events),
            vec![ViolationKind::PhoneDetected, ViolationKind::BookDetected]
        );
        assert_eq!(events[0].confidence, Some(0.82));
        assert_eq!(events[0].severity, Severity::High);
        assert_eq!(events[1].severity, Severity::Medium);
    }

    #[test]
    fn test_uncalibrated_session_skips_gaze() {
        let classifier = classifier(ProctorConfig::default());
        let mut state = SessionState::new("exam", 4, Instant::now());
        let assessment = classifier.classify_frame(&mut state, &face(80.0, 80.0), Instant::now());
        assert!(!assessment.signals.looking_away);
        assert_eq!(assessment.signals.head_pose, Some(HeadPose::new(80.0, 80.0)));
    }

    #[test]
    fn test_audio_scenario() {
        let classifier = classifier(ProctorConfig::default());
        let mut state = session(Baseline::default());
        let t0 = Instant::now();

        let first = classifier.classify_audio(&mut state, 80.0, t0);
        assert_eq!(kinds(&first), vec![ViolationKind::ExcessiveNoise]);
        assert_eq!(first[0].severity, Severity::Medium);

        assert!(classifier
            .classify_audio(&mut state, 80.0, t0 + Duration::from_secs(2))
            .is_empty());
        assert!(classifier
            .classify_audio(&mut state, 30.0, t0 + Duration::from_secs(3))
            .is_empty());
        assert_eq!(
            classifier
                .classify_audio(&mut state, 80.0, t0 + Duration::from_secs(10))
                .len(),
            1
        );
    }

    #[derive(Debug, Clone)]
    enum Step {
        Empty,
        Face(f32, f32),
        Crowd,
        Phone,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            Just(Step::Empty),
            (-40.0f32..40.0, -40.0f32..40.0).prop_map(|(p, y)| Step::Face(p, y)),
            Just(Step::Crowd),
            Just(Step::Phone),
        ]
    }

    fn perceive(step: &Step) -> PerceptionResult {
        match step {
            Step::Empty => PerceptionResult::default(),
            Step::Face(p, y) => face(*p, *y),
            Step::Crowd => PerceptionResult::new(vec![FaceObservation::with_pose(0.0, 0.0); 2], vec![]),
            Step::Phone => PerceptionResult::new(
                vec![FaceObservation::with_pose(0.0, 0.0)],
                vec![DetectedObject::new(ObjectClass::Phone, 0.9)],
            ),
        }
    }

    proptest! {
        // Interleaving two sessions yields the same per-session event kinds as running them apart
        #[test]
        fn prop_sessions_are_isolated(
            a in proptest::collection::vec(step(), 0..30),
            b in proptest::collection::vec(step(), 0..30),
            order in proptest::collection::vec(any::<bool>(), 0..60),
        ) {
            let classifier = classifier(ProctorConfig::default());
            let t0 = Instant::now();
            let tick = |i: usize| t0 + Duration::from_millis(700 * i as u64);

            let run_alone = |steps: &[Step]| {
                let mut state = session(Baseline::default());
                steps
                    .iter()
                    .enumerate()
                    .map(|(i, s)| kinds(&classifier.classify_frame(&mut state, &perceive(s), tick(i)).events))
                    .collect::<Vec<_>>()
            };
            let alone_a = run_alone(a.as_slice());
            let alone_b = run_alone(b.as_slice());

            let mut state_a = session(Baseline::default());
            let mut state_b = session(Baseline::default());
            let (mut ia, mut ib) = (0, 0);
            let (mut mixed_a, mut mixed_b) = (Vec::new(), Vec::new());
            let mut picks = order.into_iter().chain(std::iter::repeat(true));
            while ia < a.len() || ib < b.len() {
                let take_a = ib >= b.len() || (ia < a.len() && picks.next().unwrap_or(true));
                if take_a {
                    mixed_a.push(kinds(&classifier.classify_frame(&mut state_a, &perceive(&a[ia]), tick(ia)).events));
                    ia += 1;
                } else {
                    mixed_b.push(kinds(&classifier.classify_frame(&mut state_b, &perceive(&b[ib]), tick(ib)).events));
                    ib += 1;
                }
            }

            prop_assert_eq!(alone_a, mixed_a);
            prop_assert_eq!(alone_b, mixed_b);
        }
    }
}
