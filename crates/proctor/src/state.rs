//! Session state tracking

use alerting::{AlertManager, AlertPhase};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info};

use crate::{Baseline, ProctorConfig, ViolationEvent, ViolationKind};

/// Shared handle to one session; the mutex serializes frames of that session
pub type SessionHandle = Arc<Mutex<SessionState>>;

/// State of one monitored exam session
#[derive(Debug)]
pub struct SessionState {
    pub session_id: String,

    /// Student the session belongs to (for evidence naming)
    pub student_id: Option<String>,

    /// Calibrated head pose; `None` while uncalibrated
    pub baseline: Option<Baseline>,

    /// Debounce counters and last-emitted instants per violation kind
    pub alerts: AlertManager<ViolationKind>,

    /// Violations emitted over the session lifetime
    pub violation_count: usize,

    /// Frames classified
    pub frames_processed: u64,

    pub created_at: Instant,
    pub last_activity: Instant,

    /// Set on teardown; a closed session accepts no further frames
    pub closed: bool,

    events: broadcast::Sender<ViolationEvent>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, channel_capacity: usize, now: Instant) -> Self {
        let (events, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            session_id: session_id.into(),
            student_id: None,
            baseline: None,
            alerts: AlertManager::new(),
            violation_count: 0,
            frames_processed: 0,
            created_at: now,
            last_activity: now,
            closed: false,
            events,
        }
    }

    /// Set the baseline only if none is set yet
    pub fn ensure_baseline(&mut self, baseline: Baseline) -> bool {
        if self.baseline.is_some() {
            return false;
        }
        self.baseline = Some(baseline);
        true
    }

    /// Explicit re-calibration
    pub fn recalibrate(&mut self, baseline: Baseline) {
        info!(
            "Session {} recalibrated to pitch={:.1} yaw={:.1}",
            self.session_id, baseline.pitch, baseline.yaw
        );
        self.baseline = Some(baseline);
    }

    /// Publish events to subscribers; lagging subscribers lose the oldest events
    pub fn publish(&self, events: &[ViolationEvent]) {
        for event in events {
            // No subscribers is fine: the caller also gets the events directly
            let _ = self.events.send(event.clone());
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViolationEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self, config: &ProctorConfig, now: Instant) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            student_id: self.student_id.clone(),
            baseline: self.baseline,
            violation_count: self.violation_count,
            frames_processed: self.frames_processed,
            age_secs: now.saturating_duration_since(self.created_at).as_secs(),
            phases: ViolationKind::ALL
                .iter()
                .map(|&kind| (kind, self.alerts.phase(kind, &config.policy(kind), now)))
                .collect(),
        }
    }
}

/// Serializable view of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub student_id: Option<String>,
    pub baseline: Option<Baseline>,
    pub violation_count: usize,
    pub frames_processed: u64,
    pub age_secs: u64,
    pub phases: Vec<(ViolationKind, AlertPhase)>,
}

/// Engine-owned registry of live sessions
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    channel_capacity: usize,
}

impl SessionStore {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            channel_capacity,
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Fetch a session, creating it with `init` if absent; returns whether it was created
    pub async fn get_or_create<F>(&self, session_id: &str, now: Instant, init: F) -> (SessionHandle, bool)
    where
        F: FnOnce(&mut SessionState),
    {
        if let Some(handle) = self.get(session_id).await {
            return (handle, false);
        }

        let mut sessions = self.sessions.write().await;
        // Another task may have created it between the read and write locks
        if let Some(handle) = sessions.get(session_id) {
            return (handle.clone(), false);
        }

        let mut state = SessionState::new(session_id, self.channel_capacity, now);
        init(&mut state);
        let handle = Arc::new(Mutex::new(state));
        sessions.insert(session_id.to_string(), handle.clone());
        info!("Session {} created ({} active)", session_id, sessions.len());
        (handle, true)
    }

    /// Remove a session and mark it closed; waits for an in-flight frame to finish
    pub async fn remove(&self, session_id: &str) -> bool {
        let handle = self.sessions.write().await.remove(session_id);
        match handle {
            Some(handle) => {
                let mut state = handle.lock().await;
                state.closed = true;
                info!(
                    "Session {} ended after {} frame(s), {} violation(s)",
                    session_id, state.frames_processed, state.violation_count
                );
                true
            }
            None => {
                debug!("End requested for unknown session {}", session_id);
                false
            }
        }
    }

    /// Remove sessions idle for longer than `max_idle`; returns the evicted ids
    ///
    /// Runs under the map write lock so a session re-created or touched
    /// concurrently is never removed on a stale reading.
    pub async fn evict_idle(&self, max_idle: Duration, now: Instant) -> Vec<String> {
        let mut sessions = self.sessions.write().await;
        let mut evicted = Vec::new();
        sessions.retain(|id, handle| {
            // A session busy with a frame is active by definition
            let Ok(mut state) = handle.try_lock() else {
                return true;
            };
            if now.saturating_duration_since(state.last_activity) <= max_idle {
                return true;
            }
            state.closed = true;
            debug!(
                "Session {} evicted after {} frame(s), {} violation(s)",
                id, state.frames_processed, state.violation_count
            );
            evicted.push(id.clone());
            false
        });
        if !evicted.is_empty() {
            info!("Evicted {} idle session(s) ({} active)", evicted.len(), sessions.len());
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
