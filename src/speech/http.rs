//! HTTP speech backend: talks to the coach's TTS/STT endpoints.
//!
//! Synthesis: `POST {synthesis_path}` with `{"text": ...}`, answered by
//! `{"success": bool, "error"?: string}`.
//! Recognition: `POST {recognition_path}` with no body, answered by
//! `{"success": bool, "command"?, "message"?, "error"?}`. The backend reports
//! recognizer failures as HTTP 500 with a JSON body, so the body is parsed
//! before the status is judged.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::debug;

use super::{
    RecognitionResponse, SpeechRecognizer, SpeechSynthesizer, SynthesisRequest, SynthesisResponse,
};
use crate::config::SpeechConfig;
use crate::error::SpeechError;

/// Client for both speech endpoints.
#[derive(Debug, Clone)]
pub struct HttpSpeechClient {
    config: SpeechConfig,
    client: reqwest::Client,
}

impl HttpSpeechClient {
    pub fn new(config: SpeechConfig) -> Result<Self, SpeechError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SpeechError::InvalidResponse(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn post(&self, url: String) -> reqwest::RequestBuilder {
        let request = self.client.post(url);
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechClient {
    async fn synthesize(&self, text: &str) -> Result<(), SpeechError> {
        let resp = self
            .post(self.config.synthesis_url())
            .json(&SynthesisRequest {
                text: text.to_string(),
            })
            .send()
            .await
            .map_err(|e| SpeechError::SynthesisFailed {
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SpeechError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        // Older backends answer with an empty 200; treat that as accepted.
        let body = resp.text().await.map_err(|e| SpeechError::SynthesisFailed {
            reason: e.to_string(),
        })?;
        if body.trim().is_empty() {
            return Ok(());
        }
        let parsed: SynthesisResponse = serde_json::from_str(&body)
            .map_err(|e| SpeechError::InvalidResponse(format!("synthesis body: {e}")))?;
        if parsed.success {
            debug!(chars = text.len(), "Utterance dispatched");
            Ok(())
        } else {
            Err(SpeechError::SynthesisFailed {
                reason: parsed
                    .error
                    .unwrap_or_else(|| "backend reported failure".to_string()),
            })
        }
    }
}

#[async_trait]
impl SpeechRecognizer for HttpSpeechClient {
    async fn recognize(&self) -> Result<RecognitionResponse, SpeechError> {
        let resp = self
            .post(self.config.recognition_url())
            .send()
            .await
            .map_err(|e| SpeechError::RecognitionFailed {
                reason: e.to_string(),
            })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| SpeechError::RecognitionFailed {
                reason: e.to_string(),
            })?;

        match serde_json::from_str::<RecognitionResponse>(&body) {
            Ok(parsed) if status.is_success() => Ok(parsed),
            Ok(parsed) => Err(SpeechError::RecognitionFailed {
                reason: parsed
                    .error
                    .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            }),
            Err(_) if !status.is_success() => Err(SpeechError::HttpStatus {
                status: status.as_u16(),
                body,
            }),
            Err(e) => Err(SpeechError::InvalidResponse(format!("recognition body: {e}"))),
        }
    }
}
