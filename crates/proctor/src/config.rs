//! Proctoring configuration

use alerting::AlertPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ViolationKind;

/// What to do when a frame or audio sample names a session we have never seen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownSessionPolicy {
    /// Create the session lazily, using the request's baseline or a neutral (0, 0) baseline
    #[default]
    AutoCreate,
    /// Refuse unless the request carries a baseline or the session was calibrated
    Reject,
}

/// Per-kind cooldowns (milliseconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub no_person_ms: u64,
    pub multiple_faces_ms: u64,
    pub looking_away_ms: u64,
    pub phone_detected_ms: u64,
    pub book_detected_ms: u64,
    pub excessive_noise_ms: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            no_person_ms: 5_000,
            multiple_faces_ms: 5_000,
            looking_away_ms: 5_000,
            phone_detected_ms: 10_000,
            book_detected_ms: 10_000,
            excessive_noise_ms: 10_000,
        }
    }
}

impl CooldownConfig {
    pub fn get(&self, kind: ViolationKind) -> Duration {
        Duration::from_millis(match kind {
            ViolationKind::NoPerson => self.no_person_ms,
            ViolationKind::MultipleFaces => self.multiple_faces_ms,
            ViolationKind::LookingAway => self.looking_away_ms,
            ViolationKind::PhoneDetected => self.phone_detected_ms,
            ViolationKind::BookDetected => self.book_detected_ms,
            ViolationKind::ExcessiveNoise => self.excessive_noise_ms,
        })
    }

    fn scaled(&self, factor: f64) -> Self {
        let scale = |ms: u64| (ms as f64 * factor) as u64;
        Self {
            no_person_ms: scale(self.no_person_ms),
            multiple_faces_ms: scale(self.multiple_faces_ms),
            looking_away_ms: scale(self.looking_away_ms),
            phone_detected_ms: scale(self.phone_detected_ms),
            book_detected_ms: scale(self.book_detected_ms),
            excessive_noise_ms: scale(self.excessive_noise_ms),
        }
    }
}

/// Proctoring engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProctorConfig {
    /// Allowed pitch deviation from baseline (degrees)
    pub pitch_threshold_deg: f32,

    /// Allowed yaw deviation from baseline (degrees)
    pub yaw_threshold_deg: f32,

    /// Consecutive deviating frames before `looking_away` fires
    pub gaze_hysteresis_frames: u32,

    /// Consecutive frames before `no_person` / `multiple_faces` fire
    pub presence_hysteresis_frames: u32,

    /// Consecutive frames before `phone_detected` / `book_detected` fire
    pub object_hysteresis_frames: u32,

    /// Phone detection confidence threshold
    pub phone_confidence: f32,

    /// Book detection confidence threshold
    pub book_confidence: f32,

    /// Audio level above which `excessive_noise` fires
    pub noise_threshold: f32,

    /// Minimum mean luminance (0-255) for the lighting check
    pub min_brightness: f32,

    /// Allowed face-centre offset as a fraction of frame width/height
    pub centering_tolerance: f32,

    /// Per-kind cooldowns
    pub cooldowns: CooldownConfig,

    /// Perception call budget; a timeout counts as an empty detection
    pub perception_timeout_ms: u64,

    /// Concurrent perception calls (0 = available parallelism)
    pub perception_workers: usize,

    /// Per-session event channel capacity (oldest events dropped when full)
    pub event_channel_capacity: usize,

    /// Sessions idle longer than this are evicted (0 disables eviction)
    pub session_idle_timeout_secs: u64,

    /// Handling of unseen session ids
    pub unknown_session: UnknownSessionPolicy,

    /// JPEG quality for evidence snapshots
    pub evidence_jpeg_quality: u8,
}

impl Default for ProctorConfig {
    fn default() -> Self {
        Self {
            pitch_threshold_deg: 15.0,
            yaw_threshold_deg: 15.0,
            gaze_hysteresis_frames: 3,
            presence_hysteresis_frames: 1,
            object_hysteresis_frames: 1,
            phone_confidence: 0.5,
            book_confidence: 0.5,
            noise_threshold: 50.0,
            min_brightness: 60.0,
            centering_tolerance: 0.2,
            cooldowns: CooldownConfig::default(),
            perception_timeout_ms: 2_000,
            perception_workers: 0,
            event_channel_capacity: 64,
            session_idle_timeout_secs: 3_600,
            unknown_session: UnknownSessionPolicy::AutoCreate,
            evidence_jpeg_quality: 80,
        }
    }
}

impl ProctorConfig {
    /// Create strict config (lower thresholds)
    pub fn strict() -> Self {
        let defaults = Self::default();
        Self {
            pitch_threshold_deg: 10.0,
            yaw_threshold_deg: 10.0,
            gaze_hysteresis_frames: 2,
            phone_confidence: 0.35,
            book_confidence: 0.35,
            noise_threshold: 40.0,
            cooldowns: defaults.cooldowns.scaled(0.5),
            ..defaults
        }
    }

    /// Create lenient config (higher thresholds)
    pub fn lenient() -> Self {
        let defaults = Self::default();
        Self {
            pitch_threshold_deg: 25.0,
            yaw_threshold_deg: 25.0,
            gaze_hysteresis_frames: 5,
            phone_confidence: 0.65,
            book_confidence: 0.65,
            noise_threshold: 65.0,
            cooldowns: defaults.cooldowns.scaled(2.0),
            ..defaults
        }
    }

    /// Debounce/cooldown policy for a violation kind
    pub fn policy(&self, kind: ViolationKind) -> AlertPolicy {
        let frames = match kind {
            ViolationKind::LookingAway => self.gaze_hysteresis_frames,
            ViolationKind::NoPerson | ViolationKind::MultipleFaces => {
                self.presence_hysteresis_frames
            }
            ViolationKind::PhoneDetected | ViolationKind::BookDetected => {
                self.object_hysteresis_frames
            }
            // Audio level is already a scalar reading
            ViolationKind::ExcessiveNoise => 1,
        };
        AlertPolicy::new(frames, self.cooldowns.get(kind))
    }

    pub fn perception_timeout(&self) -> Duration {
        Duration::from_millis(self.perception_timeout_ms)
    }

    /// Worker count, resolving 0 to the machine's parallelism
    pub fn worker_count(&self) -> usize {
        if self.perception_workers > 0 {
            self.perception_workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }

    pub fn session_idle_timeout(&self) -> Option<Duration> {
        (self.session_idle_timeout_secs > 0)
            .then(|| Duration::from_secs(self.session_idle_timeout_secs))
    }
}
