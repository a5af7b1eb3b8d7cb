//! Alert Manager Implementation

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Debounce and cooldown policy for one alert kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertPolicy {
    /// Consecutive positive observations required before firing
    pub hysteresis_frames: u32,
    /// Minimum time between two firings of the same kind (milliseconds)
    pub cooldown_ms: u64,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            hysteresis_frames: 1,
            cooldown_ms: 5_000,
        }
    }
}

impl AlertPolicy {
    pub fn new(hysteresis_frames: u32, cooldown: Duration) -> Self {
        Self {
            hysteresis_frames,
            cooldown_ms: cooldown.as_millis() as u64,
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Hysteresis of zero behaves like one
    fn required_frames(&self) -> u32 {
        self.hysteresis_frames.max(1)
    }
}

/// Where an alert kind sits in its Idle → Suspect → Emitted cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPhase {
    /// Condition absent
    Idle,
    /// Condition present, counting consecutive observations
    Suspect(u32),
    /// Condition held; last firing is inside the cooldown window
    CoolingDown,
    /// Condition held and cooldown elapsed; next positive observation fires
    Rearmed,
}

/// State of one alert kind
#[derive(Debug, Clone, Default)]
pub struct AlertState {
    /// Consecutive positive observations
    pub consecutive: u32,
    /// Last time this alert was fired
    pub last_fired: Option<Instant>,
    /// Number of times fired
    pub fire_count: usize,
}

impl AlertState {
    /// Feed one observation; returns true when the alert fires
    pub fn observe(&mut self, active: bool, policy: &AlertPolicy, now: Instant) -> bool {
        if !active {
            self.consecutive = 0;
            return false;
        }

        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive < policy.required_frames() {
            return false;
        }

        if self.in_cooldown(policy, now) {
            return false;
        }

        self.last_fired = Some(now);
        self.fire_count += 1;
        true
    }

    fn in_cooldown(&self, policy: &AlertPolicy, now: Instant) -> bool {
        match self.last_fired {
            Some(last) => now.saturating_duration_since(last) < policy.cooldown(),
            None => false,
        }
    }

    pub fn phase(&self, policy: &AlertPolicy, now: Instant) -> AlertPhase {
        if self.consecutive == 0 {
            AlertPhase::Idle
        } else if self.consecutive < policy.required_frames() {
            AlertPhase::Suspect(self.consecutive)
        } else if self.in_cooldown(policy, now) {
            AlertPhase::CoolingDown
        } else {
            AlertPhase::Rearmed
        }
    }
}

/// Alert manager for debouncing and rate limiting, keyed by alert kind
#[derive(Debug, Clone)]
pub struct AlertManager<K> {
    /// Alert states by kind
    states: HashMap<K, AlertState>,
    /// Alerts fired across all kinds
    total_fired: usize,
}

impl<K> AlertManager<K>
where
    K: Copy + Eq + Hash + Debug,
{
    /// Create a new alert manager
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            total_fired: 0,
        }
    }

    /// Feed one observation for `kind`; returns true when an alert should be emitted
    pub fn observe(&mut self, kind: K, active: bool, policy: &AlertPolicy, now: Instant) -> bool {
        let state = self.states.entry(kind).or_default();
        let previous = state.consecutive;
        let fired = state.observe(active, policy, now);

        if fired {
            self.total_fired += 1;
            info!("Alert fired: {:?} (count: {})", kind, state.fire_count);
        } else if active && state.consecutive >= policy.required_frames() {
            debug!("Alert suppressed: {:?} in cooldown period", kind);
        } else if !active && previous > 0 {
            debug!("Alert {:?} reset after {} consecutive observation(s)", kind, previous);
        }
        fired
    }

    /// Current phase of `kind`
    pub fn phase(&self, kind: K, policy: &AlertPolicy, now: Instant) -> AlertPhase {
        self.states
            .get(&kind)
            .map(|s| s.phase(policy, now))
            .unwrap_or(AlertPhase::Idle)
    }

    /// Consecutive positive observations for `kind`
    pub fn consecutive(&self, kind: K) -> u32 {
        self.states.get(&kind).map(|s| s.consecutive).unwrap_or(0)
    }

    /// Times `kind` has fired
    pub fn fire_count(&self, kind: K) -> usize {
        self.states.get(&kind).map(|s| s.fire_count).unwrap_or(0)
    }

    /// Last firing instant of `kind`
    pub fn last_fired(&self, kind: K) -> Option<Instant> {
        self.states.get(&kind).and_then(|s| s.last_fired)
    }

    /// Alerts fired across all kinds
    pub fn total_fired(&self) -> usize {
        self.total_fired
    }

    /// Clear all alert states
    pub fn clear(&mut self) {
        self.states.clear();
        self.total_fired = 0;
    }
}

impl<K> Default for AlertManager<K>
where
    K: Copy + Eq + Hash + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}
