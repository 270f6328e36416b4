//! Integration tests for the flow WebSocket + REST surface.
//!
//! Each test spins up an Axum server on a random port with stub speech
//! backends, connects via tokio-tungstenite / reqwest, and exercises the real
//! WS / REST contract.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use voice_coach::config::FlowPlan;
use voice_coach::error::SpeechError;
use voice_coach::flow::{ChannelNavigator, FlowDeps, FlowRegistry, StepController};
use voice_coach::routes::flow_routes;
use voice_coach::speech::{RecognitionResponse, SpeechRecognizer, SpeechSynthesizer};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Speech backend that accepts every utterance and never hears anything.
struct StubSpeech;

#[async_trait]
impl SpeechSynthesizer for StubSpeech {
    async fn synthesize(&self, _text: &str) -> Result<(), SpeechError> {
        Ok(())
    }
}

#[async_trait]
impl SpeechRecognizer for StubSpeech {
    async fn recognize(&self) -> Result<RecognitionResponse, SpeechError> {
        std::future::pending::<()>().await;
        Ok(RecognitionResponse::nothing())
    }
}

/// Start an Axum server on a random port with the preset flows registered.
async fn start_server() -> u16 {
    let (navigator, _handoffs) = ChannelNavigator::new();
    let deps = FlowDeps {
        synthesizer: Arc::new(StubSpeech),
        recognizer: Arc::new(StubSpeech),
        navigator: Arc::new(navigator),
    };
    let mut registry = FlowRegistry::new();
    for (name, plan) in FlowPlan::presets() {
        registry.register(StepController::new(name, plan, deps.clone()).unwrap());
    }
    let app = flow_routes(Arc::new(registry));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    port
}

/// Parse a WS text frame into a serde_json::Value.
fn parse_ws_json(msg: &Message) -> Value {
    match msg {
        Message::Text(txt) => serde_json::from_str(txt).expect("invalid JSON from server"),
        other => panic!("expected Text frame, got {:?}", other),
    }
}

async fn post(port: u16, path: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}{path}"))
        .send()
        .await
        .unwrap()
}

// ── WebSocket Tests ──────────────────────────────────────────────────

#[tokio::test]
async fn ws_connect_receives_status_first() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server().await;

        let (mut ws, _resp) = connect_async(format!("ws://127.0.0.1:{port}/ws/flows/intake"))
            .await
            .expect("WS connect failed");

        let msg = ws.next().await.unwrap().unwrap();
        let json = parse_ws_json(&msg);

        assert_eq!(json["type"], "status");
        assert_eq!(json["flow"], "intake");
        assert_eq!(json["phase"]["state"], "idle");
        assert_eq!(json["step"], "intro");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_streams_steps_and_click_handoff() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server().await;

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws/flows/intake"))
            .await
            .unwrap();
        let _status = ws.next().await.unwrap().unwrap();

        assert_eq!(post(port, "/api/flows/intake/start").await.status(), 200);

        let json = parse_ws_json(&ws.next().await.unwrap().unwrap());
        assert_eq!(json["type"], "session_started");

        // Wait until the click step is live.
        loop {
            let json = parse_ws_json(&ws.next().await.unwrap().unwrap());
            if json["type"] == "step_changed" && json["step"] == "await_visual_ack" {
                assert_eq!(json["index"], 1);
                break;
            }
        }

        let resp = post(port, "/api/flows/intake/click").await;
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["accepted"], true);

        let json = parse_ws_json(&ws.next().await.unwrap().unwrap());
        assert_eq!(json["type"], "navigated");
        assert_eq!(json["destination"], "userinterface1");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_unknown_flow_is_rejected() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server().await;
        let result = connect_async(format!("ws://127.0.0.1:{port}/ws/flows/missing")).await;
        assert!(result.is_err());
    })
    .await
    .expect("test timed out");
}

// ── REST Endpoint Tests ──────────────────────────────────────────────

#[tokio::test]
async fn rest_health_endpoint() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server().await;

        let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "voice-coach");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_list_flows() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server().await;

        let resp = reqwest::get(format!("http://127.0.0.1:{port}/api/flows"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let body: Vec<Value> = resp.json().await.unwrap();
        let names: Vec<&str> = body.iter().map(|f| f["flow"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["intake", "start"]);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_unknown_flow_is_404() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server().await;

        let resp = reqwest::get(format!("http://127.0.0.1:{port}/api/flows/missing"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "Unknown flow: missing");

        assert_eq!(post(port, "/api/flows/missing/click").await.status(), 404);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_start_stop_lifecycle() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server().await;

        // Nothing to stop yet.
        assert_eq!(post(port, "/api/flows/start/stop").await.status(), 409);

        let resp = post(port, "/api/flows/start/start").await;
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        let session_id = body["session_id"].as_str().unwrap().to_string();

        assert_eq!(post(port, "/api/flows/start/start").await.status(), 409);

        let status: Value = reqwest::get(format!("http://127.0.0.1:{port}/api/flows/start"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["session_id"], session_id.as_str());
        assert_eq!(status["phase"]["state"], "running");

        assert_eq!(post(port, "/api/flows/start/stop").await.status(), 204);

        let status: Value = reqwest::get(format!("http://127.0.0.1:{port}/api/flows/start"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["phase"]["state"], "stopped");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_fallback_then_click_is_refused() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server().await;

        // Not running: nothing accepts the signal.
        let body: Value = post(port, "/api/flows/intake/fallback").await.json().await.unwrap();
        assert_eq!(body["accepted"], false);

        assert_eq!(post(port, "/api/flows/intake/start").await.status(), 200);
        let body: Value = post(port, "/api/flows/intake/fallback").await.json().await.unwrap();
        assert_eq!(body["accepted"], true);

        let body: Value = post(port, "/api/flows/intake/click").await.json().await.unwrap();
        assert_eq!(body["accepted"], false);

        let status: Value = reqwest::get(format!("http://127.0.0.1:{port}/api/flows/intake"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["step"], "fallback");
        assert_eq!(status["step_index"], 3);
    })
    .await
    .expect("test timed out");
}
