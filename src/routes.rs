//! WebSocket server + REST endpoints for the presentation layer.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::error::FlowError;
use crate::flow::{FlowRegistry, FlowStatus, StepController};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<FlowRegistry>,
}

/// Build the Axum router with flow WebSocket and REST routes.
pub fn flow_routes(registry: Arc<FlowRegistry>) -> Router {
    let state = AppState { registry };

    Router::new()
        .route("/health", get(health))
        .route("/api/flows", get(list_flows))
        .route("/api/flows/{name}", get(flow_status))
        .route("/api/flows/{name}/start", post(start_flow))
        .route("/api/flows/{name}/stop", post(stop_flow))
        .route("/api/flows/{name}/click", post(click))
        .route("/api/flows/{name}/fallback", post(fallback))
        .route("/ws/flows/{name}", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        let status = match &self {
            FlowError::UnknownFlow(_) => StatusCode::NOT_FOUND,
            FlowError::AlreadyRunning { .. } | FlowError::NotRunning { .. } => StatusCode::CONFLICT,
            FlowError::InvalidPlan(_) => StatusCode::BAD_REQUEST,
            FlowError::InvalidTransition { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

#[derive(Serialize)]
struct Accepted {
    accepted: bool,
}

/// First frame on every WebSocket, and the re-sync frame after lag.
#[derive(Serialize)]
struct StatusFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    status: &'a FlowStatus,
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "voice-coach"
    }))
}

// ── REST Endpoints ──────────────────────────────────────────────────────

async fn list_flows(State(state): State<AppState>) -> impl IntoResponse {
    let flows = join_all(state.registry.all().map(|c| c.status())).await;
    Json(flows)
}

async fn flow_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<FlowStatus>, FlowError> {
    let controller = state.registry.get(&name)?;
    Ok(Json(controller.status().await))
}

async fn start_flow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, FlowError> {
    let controller = state.registry.get(&name)?;
    let session_id = controller.start().await?;
    info!(flow = %name, session_id = %session_id, "Flow started via REST");
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({"session_id": session_id})),
    ))
}

async fn stop_flow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, FlowError> {
    state.registry.get(&name)?.stop().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn click(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Accepted>, FlowError> {
    let accepted = state.registry.get(&name)?.click().await;
    debug!(flow = %name, accepted, "Click delivered");
    Ok(Json(Accepted { accepted }))
}

async fn fallback(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Accepted>, FlowError> {
    let accepted = state.registry.get(&name)?.signal_fallback().await;
    debug!(flow = %name, accepted, "Fallback signal delivered");
    Ok(Json(Accepted { accepted }))
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, FlowError> {
    let controller = state.registry.get(&name)?;
    info!(flow = %name, "WebSocket client connecting");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, controller)))
}

async fn send_status(socket: &mut WebSocket, controller: &StepController) -> bool {
    let status = controller.status().await;
    let frame = StatusFrame {
        kind: "status",
        status: &status,
    };
    match serde_json::to_string(&frame) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize status frame");
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, controller: Arc<StepController>) {
    // Subscribe before the snapshot so nothing falls between the two.
    let mut rx = controller.subscribe();

    if !send_status(&mut socket, &controller).await {
        warn!("Failed to send initial status, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(notice) => {
                        if let Ok(json) = serde_json::to_string(&notice)
                            && socket.send(Message::Text(json.into())).await.is_err()
                        {
                            debug!("Client disconnected during send");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind flow notices");
                        if !send_status(&mut socket, &controller).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Notice channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(flow = %controller.name(), "WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!(flow = %controller.name(), "WebSocket connection closed");
}
