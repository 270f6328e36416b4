//! Speech collaborators: text-to-speech and speech-to-text backends.
//!
//! The flow never talks to a backend directly; it goes through the
//! [`SpeechSynthesizer`] and [`SpeechRecognizer`] traits so tests can swap in
//! scripted stubs and the binary can use the HTTP client in [`http`].

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SpeechError;

pub use http::HttpSpeechClient;

/// Body of a synthesis request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SynthesisRequest {
    pub text: String,
}

/// Status returned by the synthesis endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SynthesisResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Raw answer of one recognition round trip, as the backend reports it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecognitionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecognitionResponse {
    /// A successful recognition of `command`.
    pub fn heard(command: impl Into<String>) -> Self {
        Self {
            success: true,
            command: Some(command.into()),
            ..Default::default()
        }
    }

    /// Nothing usable was recognized.
    pub fn nothing() -> Self {
        Self::default()
    }
}

/// Speaks one utterance.
///
/// Resolves once the backend has accepted the utterance; playback completion
/// is not awaited.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<(), SpeechError>;
}

/// Runs one recognition attempt.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn recognize(&self) -> Result<RecognitionResponse, SpeechError>;
}
