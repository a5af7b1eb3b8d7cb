//! Proctoring API Server
//!
//! REST API and WebSocket server in front of the proctoring engine.

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use evidence::{EvidenceStore, LocalEvidenceStore};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use perception::OnnxPerception;
use proctor::ProctorEngine;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

pub mod config;
pub mod error;
pub mod routes;

pub use crate::config::ServiceConfig;
pub use error::{ApiError, ErrorBody};

/// Request body cap; base64 frames are large
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Application state shared across handlers
pub struct AppState {
    pub engine: Arc<ProctorEngine>,
    /// Target for client-submitted snapshots
    pub evidence_store: Option<Arc<dyn EvidenceStore>>,
    /// Prometheus render handle; `None` when no recorder is installed
    pub metrics: Option<PrometheusHandle>,
    pub version: String,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(engine: Arc<ProctorEngine>) -> Self {
        Self {
            engine,
            evidence_store: None,
            metrics: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn with_evidence_store(mut self, store: Option<Arc<dyn EvidenceStore>>) -> Self {
        self.evidence_store = store;
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub status: &'static str,
    pub version: String,
    pub models_loaded: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// RFC3339
    pub timestamp: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub models_loaded: bool,
    pub active_sessions: usize,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/calibrate", post(routes::session::calibrate))
        .route("/environment-check", post(routes::session::environment_check))
        .route("/process-frame", post(routes::session::process_frame))
        .route("/sessions/:session_id", get(routes::session::get_session))
        .route("/sessions/:session_id/end", post(routes::session::end_session))
        .route(
            "/upload-violation-snapshot",
            post(routes::evidence::upload_snapshot),
        )
        .route("/ws/proctoring/:session_id", get(routes::ws::ws_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root_handler(State(state): State<Arc<AppState>>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "AI Proctoring Service",
        status: "running",
        version: state.version.clone(),
        models_loaded: state.engine.models_loaded(),
    })
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        models_loaded: state.engine.models_loaded(),
        active_sessions: state.engine.session_count().await,
    })
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default()
}

/// Initialize logging
pub fn init_logging(
    level: &str,
    json: bool,
) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
}

/// Build the engine from configuration and serve until Ctrl-C
pub async fn run_server(config: ServiceConfig) -> anyhow::Result<()> {
    let perception =
        OnnxPerception::new(&config.perception).context("Failed to initialise perception")?;

    let evidence_store: Option<Arc<dyn EvidenceStore>> = match &config.evidence_dir {
        Some(dir) => {
            let store = LocalEvidenceStore::new(dir)
                .with_context(|| format!("Failed to open evidence directory {}", dir.display()))?;
            info!("Evidence snapshots stored under {}", dir.display());
            Some(Arc::new(store))
        }
        None => None,
    };

    let mut engine = ProctorEngine::new(config.proctor.clone(), Arc::new(perception));
    if let Some(store) = &evidence_store {
        engine = engine.with_evidence_store(store.clone());
    }
    let engine = Arc::new(engine);
    engine
        .clone()
        .spawn_evictor(Duration::from_secs(config.eviction_interval_secs.max(1)));

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    let state = Arc::new(
        AppState::new(engine)
            .with_evidence_store(evidence_store)
            .with_metrics(metrics),
    );
    let app = create_router(state);

    info!("Starting API server on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
            }
        })
        .await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use evidence::MemoryEvidenceStore;
    use frame_codec::VideoFrame;
    use perception::{FaceObservation, PerceptionResult, ScriptedPerception};
    use proctor::{ProctorConfig, UnknownSessionPolicy};
    use serde_json::Value;
    use tower::ServiceExt;

    pub(crate) fn encoded_frame(luma: u8) -> String {
        let frame = VideoFrame::solid(64, 48, [luma, luma, luma]);
        STANDARD.encode(frame_codec::encode_jpeg(&frame, 90).unwrap())
    }

    pub(crate) fn state_with(config: ProctorConfig, results: Vec<PerceptionResult>) -> AppState {
        let perception = Arc::new(ScriptedPerception::sequence(results));
        AppState::new(Arc::new(ProctorEngine::new(config, perception)))
    }

    pub(crate) fn scripted_state(results: Vec<PerceptionResult>) -> AppState {
        state_with(ProctorConfig::default(), results)
    }

    async fn send(app: Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(Arc::new(scripted_state(vec![])));
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["active_sessions"], 0);
    }

    #[tokio::test]
    async fn test_calibrate() {
        let app = create_router(Arc::new(scripted_state(vec![PerceptionResult::new(
            vec![FaceObservation::with_pose(-4.0, 12.5)],
            vec![],
        )])));

        let (status, json) = send(
            app.clone(),
            "POST",
            "/calibrate",
            serde_json::json!({"frame_base64": "not-an-image"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Invalid frame data");

        let payload = format!("data:image/jpeg;base64,{}", encoded_frame(120));
        let (_, json) = send(
            app,
            "POST",
            "/calibrate",
            serde_json::json!({"frame_base64": payload}),
        )
        .await;
        assert_eq!(json["success"], true);
        assert_eq!(json["pitch"], -4.0);
        assert_eq!(json["yaw"], 12.5);
    }

    #[tokio::test]
    async fn test_environment_check_dark_and_empty() {
        let app = create_router(Arc::new(scripted_state(vec![])));
        let (status, json) = send(
            app,
            "POST",
            "/environment-check",
            serde_json::json!({"frame_base64": encoded_frame(10)}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["lighting_ok"], false);
        assert_eq!(json["face_detected"], false);
        assert_eq!(json["face_centered"], false);
        assert_eq!(json["message"], "Lighting is too dark; No face detected");
    }

    #[tokio::test]
    async fn test_process_frame() {
        let state = Arc::new(scripted_state(vec![]));
        let app = create_router(state.clone());

        let (status, json) = send(
            app.clone(),
            "POST",
            "/process-frame",
            serde_json::json!({"session_id": "exam-1", "frame_base64": "%%%"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "invalid_frame");
        assert_eq!(state.engine.session_count().await, 0);

        let (status, json) = send(
            app.clone(),
            "POST",
            "/process-frame",
            serde_json::json!({
                "session_id": "exam-1",
                "frame_base64": encoded_frame(120),
                "calibrated_pitch": 0.0,
                "calibrated_yaw": 0.0,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["no_person"], true);
        assert_eq!(json["violations"][0]["type"], "no_person");
        assert_eq!(json["violations"][0]["severity"], "high");
        assert_eq!(json["violations"][0]["evidence_id"], json["evidence_id"]);
        assert!(json["snapshot_base64"].is_string());
        let timestamp = json["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());

        let (status, json) = send(app.clone(), "GET", "/sessions/exam-1", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["violation_count"], 1);

        let (status, _) = send(app.clone(), "POST", "/sessions/exam-1/end", Value::Null).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, json) = send(app, "GET", "/sessions/exam-1", Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "unknown_session");
    }

    #[tokio::test]
    async fn test_reject_unknown_session() {
        let config = ProctorConfig {
            unknown_session: UnknownSessionPolicy::Reject,
            ..Default::default()
        };
        let app = create_router(Arc::new(state_with(config, vec![])));
        let (status, json) = send(
            app,
            "POST",
            "/process-frame",
            serde_json::json!({"session_id": "ghost", "frame_base64": encoded_frame(120)}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "unknown_session");
    }

    #[tokio::test]
    async fn test_upload_snapshot() {
        let request = serde_json::json!({
            "exam_id": "exam-7",
            "student_id": "s-1",
            "violation_type": "phone_detected",
            "snapshot_base64": encoded_frame(100),
        });

        let app = create_router(Arc::new(scripted_state(vec![])));
        let (status, json) = send(app, "POST", "/upload-violation-snapshot", request.clone()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["error"], "evidence_disabled");

        let store = Arc::new(MemoryEvidenceStore::new(8));
        let state = scripted_state(vec![]).with_evidence_store(Some(store.clone()));
        let app = create_router(Arc::new(state));
        let (status, json) = send(app, "POST", "/upload-violation-snapshot", request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert!(json["filename"]
            .as_str()
            .unwrap()
            .starts_with("exam-7/s-1_phone_detected_"));
        assert_eq!(store.len(), 1);
    }
}
