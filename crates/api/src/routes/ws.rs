//! Live proctoring over WebSocket
//!
//! Client → server text messages:
//! `{"type":"frame","frame":"<base64>","calibrated_pitch":0.0,"calibrated_yaw":0.0}`,
//! `{"type":"audio","audio_level":72.5}`, `{"type":"ping"}`, `{"type":"end"}`.
//! Server → client: `detection_result`, `violation`, `pong`, `error`.
//! Violations raised for the session by other producers (HTTP frames, other
//! sockets) are forwarded as `violation`. Closing the socket ends the session.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use proctor::{FrameRequest, ViolationEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::routes::session::{client_baseline, FrameResponse};
use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Frame {
        frame: String,
        #[serde(default)]
        calibrated_pitch: Option<f32>,
        #[serde(default)]
        calibrated_yaw: Option<f32>,
        #[serde(default)]
        student_id: Option<String>,
    },
    Audio {
        #[serde(default)]
        audio_level: f32,
    },
    Ping,
    End,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    DetectionResult(FrameResponse),
    Violation(ViolationEvent),
    Pong,
    Error { error: String, message: String },
}

impl From<ApiError> for ServerMessage {
    fn from(e: ApiError) -> Self {
        let body = e.body();
        ServerMessage::Error {
            error: body.error.to_string(),
            message: body.message,
        }
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

enum Input {
    Client(Option<Result<Message, axum::Error>>),
    Event(Result<ViolationEvent, RecvError>),
}

async fn handle_socket(mut socket: WebSocket, session_id: String, state: Arc<AppState>) {
    info!("WebSocket connected: {}", session_id);

    let mut events = state.engine.subscribe(&session_id).await;
    let mut delivered = HashSet::new();

    loop {
        let input = tokio::select! {
            message = socket.recv() => Input::Client(message),
            event = next_event(&mut events) => Input::Event(event),
        };

        let (replies, end) = match input {
            Input::Client(Some(Ok(Message::Text(text)))) => {
                let (replies, end) = handle_message(&state, &session_id, &text).await;
                mark_delivered(&replies, &mut delivered);
                if events.is_none() {
                    events = state.engine.subscribe(&session_id).await;
                }
                (replies, end)
            }
            Input::Client(Some(Ok(Message::Close(_)))) | Input::Client(None) => break,
            Input::Client(Some(Ok(_))) => continue,
            Input::Client(Some(Err(e))) => {
                warn!("WebSocket error for {}: {}", session_id, e);
                break;
            }
            Input::Event(Err(RecvError::Closed)) => {
                debug!("Event channel closed for {}", session_id);
                events = None;
                continue;
            }
            Input::Event(event) => match forward(event, &mut delivered) {
                Some(reply) => (vec![reply], false),
                None => continue,
            },
        };

        if !send_all(&mut socket, &session_id, replies).await || end {
            break;
        }
    }

    state.engine.end_session(&session_id).await;
    info!("WebSocket disconnected: {}", session_id);
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<ViolationEvent>>,
) -> Result<ViolationEvent, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Returns false once the socket is gone
async fn send_all(socket: &mut WebSocket, session_id: &str, replies: Vec<ServerMessage>) -> bool {
    for reply in replies {
        let payload = match serde_json::to_string(&reply) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize reply for {}: {}", session_id, e);
                continue;
            }
        };
        if socket.send(Message::Text(payload)).await.is_err() {
            return false;
        }
    }
    true
}

/// Remember events already sent as direct replies so the channel copy is skipped
fn mark_delivered(replies: &[ServerMessage], delivered: &mut HashSet<Uuid>) {
    for reply in replies {
        match reply {
            ServerMessage::DetectionResult(result) => {
                delivered.extend(result.violations.iter().map(|e| e.id));
            }
            ServerMessage::Violation(event) => {
                delivered.insert(event.id);
            }
            _ => {}
        }
    }
}

/// Map one channel item to an outgoing message, skipping events the client already has
fn forward(
    event: Result<ViolationEvent, RecvError>,
    delivered: &mut HashSet<Uuid>,
) -> Option<ServerMessage> {
    match event {
        Ok(event) if delivered.remove(&event.id) => None,
        Ok(event) => Some(ServerMessage::Violation(event)),
        Err(RecvError::Lagged(skipped)) => {
            // Dropped events will never arrive to match
            delivered.clear();
            Some(ServerMessage::Error {
                error: "events_lagged".to_string(),
                message: format!("{} event(s) dropped", skipped),
            })
        }
        Err(RecvError::Closed) => None,
    }
}

/// Handle one client message; returns the replies and whether the client ended the session
pub async fn handle_message(
    state: &AppState,
    session_id: &str,
    text: &str,
) -> (Vec<ServerMessage>, bool) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            debug!("Malformed message on {}: {}", session_id, e);
            return (
                vec![ServerMessage::Error {
                    error: "invalid_message".to_string(),
                    message: e.to_string(),
                }],
                false,
            );
        }
    };

    match message {
        ClientMessage::Frame {
            frame,
            calibrated_pitch,
            calibrated_yaw,
            student_id,
        } => {
            let request = FrameRequest {
                session_id: session_id.to_string(),
                student_id,
                baseline: client_baseline(calibrated_pitch, calibrated_yaw),
            };
            let reply = match frame_codec::decode_base64(&frame) {
                Ok(frame) => match state.engine.process_frame(request, frame).await {
                    Ok(outcome) => ServerMessage::DetectionResult(outcome.into()),
                    Err(e) => ApiError::from(e).into(),
                },
                Err(e) => ApiError::from(e).into(),
            };
            (vec![reply], false)
        }
        ClientMessage::Audio { audio_level } => {
            match state.engine.process_audio(session_id, audio_level).await {
                Ok(outcome) => (
                    outcome
                        .violations
                        .into_iter()
                        .map(ServerMessage::Violation)
                        .collect(),
                    false,
                ),
                Err(e) => (vec![ApiError::from(e).into()], false),
            }
        }
        ClientMessage::Ping => (vec![ServerMessage::Pong], false),
        ClientMessage::End => (Vec::new(), true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{encoded_frame, scripted_state, state_with};
    use perception::{FaceObservation, PerceptionResult};
    use proctor::{Baseline, ProctorConfig, UnknownSessionPolicy, ViolationKind};
    use serde_json::Value;

    #[tokio::test]
    async fn test_ping() {
        let state = scripted_state(vec![]);
        let (replies, end) = handle_message(&state, "exam", r#"{"type":"ping"}"#).await;
        assert!(!end);
        let json = serde_json::to_value(&replies).unwrap();
        assert_eq!(json, serde_json::json!([{"type": "pong"}]));
    }

    #[tokio::test]
    async fn test_frame_then_audio() {
        let state = scripted_state(vec![PerceptionResult::new(
            vec![FaceObservation::with_pose(0.0, 0.0)],
            vec![],
        )]);
        let frame = serde_json::json!({"type": "frame", "frame": encoded_frame(120)}).to_string();

        let (replies, _) = handle_message(&state, "exam", &frame).await;
        let json: Value = serde_json::to_value(&replies[0]).unwrap();
        assert_eq!(json["type"], "detection_result");
        assert_eq!(json["data"]["face_count"], 1);
        assert_eq!(json["data"]["violations"], serde_json::json!([]));

        let loud = r#"{"type":"audio","audio_level":80}"#;
        let (replies, _) = handle_message(&state, "exam", loud).await;
        let json: Value = serde_json::to_value(&replies).unwrap();
        assert_eq!(json[0]["type"], "violation");
        assert_eq!(json[0]["data"]["type"], "excessive_noise");
        assert_eq!(json[0]["data"]["severity"], "medium");

        // Within cooldown
        let (replies, _) = handle_message(&state, "exam", loud).await;
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_bad_payloads() {
        let state = scripted_state(vec![]);

        let (replies, _) = handle_message(&state, "exam", "not json").await;
        let json: Value = serde_json::to_value(&replies[0]).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["data"]["error"], "invalid_message");

        let bad_frame = r#"{"type":"frame","frame":"@@@"}"#;
        let (replies, _) = handle_message(&state, "exam", bad_frame).await;
        let json: Value = serde_json::to_value(&replies[0]).unwrap();
        assert_eq!(json["data"]["error"], "invalid_frame");
        assert_eq!(state.engine.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_end() {
        let state = scripted_state(vec![]);
        let (replies, end) = handle_message(&state, "exam", r#"{"type":"end"}"#).await;
        assert!(replies.is_empty());
        assert!(end);
    }

    #[tokio::test]
    async fn test_uncalibrated_frame_rejected_under_reject_policy() {
        let config = ProctorConfig {
            unknown_session: UnknownSessionPolicy::Reject,
            ..Default::default()
        };
        let state = state_with(
            config,
            vec![PerceptionResult::new(vec![FaceObservation::with_pose(0.0, 0.0)], vec![])],
        );

        let bare = serde_json::json!({"type": "frame", "frame": encoded_frame(120)}).to_string();
        let (replies, _) = handle_message(&state, "exam", &bare).await;
        let json: Value = serde_json::to_value(&replies[0]).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["data"]["error"], "unknown_session");
        assert_eq!(state.engine.session_count().await, 0);

        let calibrated = serde_json::json!({
            "type": "frame",
            "frame": encoded_frame(120),
            "calibrated_pitch": 2.0,
            "calibrated_yaw": -4.0,
        })
        .to_string();
        let (replies, _) = handle_message(&state, "exam", &calibrated).await;
        let json: Value = serde_json::to_value(&replies[0]).unwrap();
        assert_eq!(json["type"], "detection_result");
        let snapshot = state.engine.session_snapshot("exam").await.unwrap();
        assert_eq!(snapshot.baseline, Some(Baseline::new(2.0, -4.0)));
    }

    #[tokio::test]
    async fn test_forwards_events_from_other_producers() {
        let state = scripted_state(vec![PerceptionResult::new(
            vec![FaceObservation::with_pose(0.0, 0.0)],
            vec![],
        )]);
        let frame = serde_json::json!({"type": "frame", "frame": encoded_frame(120)}).to_string();
        let (replies, _) = handle_message(&state, "exam", &frame).await;
        let mut delivered = HashSet::new();
        mark_delivered(&replies, &mut delivered);

        let mut events = state.engine.subscribe("exam").await;
        assert!(events.is_some());

        // An HTTP client reporting audio for the same session
        let outcome = state.engine.process_audio("exam", 80.0).await.unwrap();
        let event = next_event(&mut events).await;
        let json = serde_json::to_value(forward(event, &mut delivered)).unwrap();
        assert_eq!(json["type"], "violation");
        assert_eq!(json["data"]["type"], "excessive_noise");
        assert_eq!(json["data"]["id"], outcome.violations[0].id.to_string());

        state.engine.end_session("exam").await;
        assert!(matches!(next_event(&mut events).await, Err(RecvError::Closed)));
    }

    #[test]
    fn test_forward_dedup_and_lag() {
        let event = ViolationEvent::new(ViolationKind::ExcessiveNoise);
        let mut delivered = HashSet::from([event.id]);

        // The channel copy of a direct reply is skipped once
        assert!(forward(Ok(event.clone()), &mut delivered).is_none());
        assert!(delivered.is_empty());
        assert!(matches!(
            forward(Ok(event), &mut delivered),
            Some(ServerMessage::Violation(_))
        ));

        delivered.insert(Uuid::new_v4());
        let json = serde_json::to_value(forward(Err(RecvError::Lagged(3)), &mut delivered)).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["data"]["error"], "events_lagged");
        assert_eq!(json["data"]["message"], "3 event(s) dropped");
        assert!(delivered.is_empty());
        assert!(forward(Err(RecvError::Closed), &mut delivered).is_none());
    }
}
