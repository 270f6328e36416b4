//! HttpSpeechClient against an in-process stub of the speech backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use voice_coach::config::SpeechConfig;
use voice_coach::error::SpeechError;
use voice_coach::speech::{HttpSpeechClient, SpeechRecognizer, SpeechSynthesizer};
use voice_coach::voice::{CommandListener, CommandMatcher};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// What the stub answers and what it saw.
#[derive(Clone, Default)]
struct Backend {
    spoken: Arc<Mutex<Vec<String>>>,
    auth: Arc<Mutex<Vec<Option<String>>>>,
    synthesis: Arc<Mutex<(u16, Value)>>,
    recognition: Arc<Mutex<(u16, String)>>,
}

impl Backend {
    fn new() -> Self {
        let backend = Self::default();
        *backend.synthesis.lock().unwrap() = (200, json!({"success": true}));
        *backend.recognition.lock().unwrap() = (
            200,
            json!({"success": true, "command": "Hello.", "message": "Command received"}).to_string(),
        );
        backend
    }

    fn recognize_with(&self, status: u16, body: impl Into<String>) {
        *self.recognition.lock().unwrap() = (status, body.into());
    }
}

async fn tts(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    backend.auth.lock().unwrap().push(
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    );
    backend
        .spoken
        .lock()
        .unwrap()
        .push(body["text"].as_str().unwrap_or_default().to_string());
    let (status, reply) = backend.synthesis.lock().unwrap().clone();
    (StatusCode::from_u16(status).unwrap(), Json(reply))
}

async fn stt(State(backend): State<Backend>) -> impl IntoResponse {
    let (status, body) = backend.recognition.lock().unwrap().clone();
    (StatusCode::from_u16(status).unwrap(), body)
}

async fn start_backend() -> (Backend, SpeechConfig) {
    let backend = Backend::new();
    let app = Router::new()
        .route("/api/text-to-speech", post(tts))
        .route("/api/speech-to-text", post(stt))
        .with_state(backend.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    (backend, SpeechConfig::new(format!("http://127.0.0.1:{port}")))
}

#[tokio::test]
async fn synthesis_posts_text() {
    timeout(TEST_TIMEOUT, async {
        let (backend, config) = start_backend().await;
        let client = HttpSpeechClient::new(config).unwrap();

        client.synthesize("Welcome to your AI Coach Assistant").await.unwrap();
        assert_eq!(
            backend.spoken.lock().unwrap().as_slice(),
            ["Welcome to your AI Coach Assistant"]
        );
        assert_eq!(backend.auth.lock().unwrap().as_slice(), [None]);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn synthesis_sends_bearer_key_when_configured() {
    timeout(TEST_TIMEOUT, async {
        let (backend, mut config) = start_backend().await;
        config.api_key = Some("s3cret".to_string().into());
        let client = HttpSpeechClient::new(config).unwrap();

        client.synthesize("hi").await.unwrap();
        assert_eq!(
            backend.auth.lock().unwrap().as_slice(),
            [Some("Bearer s3cret".to_string())]
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn synthesis_failure_reports_backend_reason() {
    timeout(TEST_TIMEOUT, async {
        let (backend, config) = start_backend().await;
        *backend.synthesis.lock().unwrap() = (200, json!({"success": false, "error": "no audio device"}));
        let client = HttpSpeechClient::new(config).unwrap();

        let err = client.synthesize("hi").await.unwrap_err();
        match err {
            SpeechError::SynthesisFailed { reason } => assert_eq!(reason, "no audio device"),
            other => panic!("unexpected error: {other:?}"),
        }

        *backend.synthesis.lock().unwrap() = (503, json!({"success": false}));
        let err = client.synthesize("hi").await.unwrap_err();
        assert!(matches!(err, SpeechError::HttpStatus { status: 503, .. }));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn recognition_returns_raw_command() {
    timeout(TEST_TIMEOUT, async {
        let (_backend, config) = start_backend().await;
        let client = HttpSpeechClient::new(config).unwrap();

        let resp = client.recognize().await.unwrap();
        assert!(resp.success);
        assert_eq!(resp.command.as_deref(), Some("Hello."));
        assert_eq!(resp.message.as_deref(), Some("Command received"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn recognition_500_with_json_body_is_a_recognizer_failure() {
    timeout(TEST_TIMEOUT, async {
        let (backend, config) = start_backend().await;
        backend.recognize_with(
            500,
            json!({"success": false, "error": "Could not understand audio"}).to_string(),
        );
        let client = HttpSpeechClient::new(config).unwrap();

        match client.recognize().await.unwrap_err() {
            SpeechError::RecognitionFailed { reason } => {
                assert_eq!(reason, "Could not understand audio")
            }
            other => panic!("unexpected error: {other:?}"),
        }

        backend.recognize_with(502, "<html>bad gateway</html>");
        let err = client.recognize().await.unwrap_err();
        assert!(matches!(err, SpeechError::HttpStatus { status: 502, .. }));

        backend.recognize_with(200, "not json");
        let err = client.recognize().await.unwrap_err();
        assert!(matches!(err, SpeechError::InvalidResponse(_)));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn listener_over_http_normalizes_and_matches() {
    timeout(TEST_TIMEOUT, async {
        let (backend, config) = start_backend().await;
        let client = Arc::new(HttpSpeechClient::new(config).unwrap());
        let listener = CommandListener::new(client);
        let matcher = CommandMatcher::phrase("hello");

        let result = listener.listen_once().await;
        assert!(result.success);
        assert!(matcher.matches(result.command.as_deref().unwrap()));

        backend.recognize_with(500, json!({"success": false, "error": "mic busy"}).to_string());
        let result = listener.listen_once().await;
        assert!(!result.success);
        assert!(result.is_transport_failure());
    })
    .await
    .expect("test timed out");
}
