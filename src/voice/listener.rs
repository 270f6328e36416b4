//! Command listener: one recognition attempt, normalized and classified.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::speech::{RecognitionResponse, SpeechRecognizer};

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static TRAILING_PUNCT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\p{P}\s]+$").unwrap());

/// Lower-case, trim, and collapse inner whitespace.
///
/// Idempotent: normalizing a normalized command changes nothing.
pub fn normalize_command(raw: &str) -> String {
    WHITESPACE
        .replace_all(raw.trim(), " ")
        .to_lowercase()
}

fn strip_trailing_punctuation(command: &str) -> &str {
    match TRAILING_PUNCT.find(command) {
        Some(m) => &command[..m.start()],
        None => command,
    }
}

/// Case-insensitive exact match against one phrase, tolerant of trailing
/// punctuation ("Hello." and "hello!" both match `hello`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMatcher {
    phrase: String,
}

impl CommandMatcher {
    pub fn phrase(phrase: &str) -> Self {
        let normalized = normalize_command(phrase);
        Self {
            phrase: strip_trailing_punctuation(&normalized).to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.phrase
    }

    pub fn is_empty(&self) -> bool {
        self.phrase.is_empty()
    }

    pub fn matches(&self, command: &str) -> bool {
        let normalized = normalize_command(command);
        !self.phrase.is_empty() && strip_trailing_punctuation(&normalized) == self.phrase
    }
}

/// Outcome of one recognition attempt, with the command already normalized.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecognitionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Set when the attempt failed to reach the recognizer at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<RecognitionResponse> for RecognitionResult {
    fn from(resp: RecognitionResponse) -> Self {
        let command = resp
            .command
            .map(|c| normalize_command(&c))
            .filter(|c| !c.is_empty());
        Self {
            success: resp.success && command.is_some(),
            command,
            message: resp.message,
            error: resp.error,
        }
    }
}

impl RecognitionResult {
    pub fn is_transport_failure(&self) -> bool {
        !self.success && self.error.is_some()
    }
}

/// Issues single recognition attempts. Never fails: transport errors come
/// back as an unsuccessful result.
#[derive(Clone)]
pub struct CommandListener {
    recognizer: Arc<dyn SpeechRecognizer>,
}

impl CommandListener {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        Self { recognizer }
    }

    pub async fn listen_once(&self) -> RecognitionResult {
        match self.recognizer.recognize().await {
            Ok(resp) => {
                let result = RecognitionResult::from(resp);
                debug!(success = result.success, command = ?result.command, "Recognition attempt finished");
                result
            }
            Err(e) => {
                warn!(error = %e, "Recognition attempt failed");
                RecognitionResult {
                    success: false,
                    command: None,
                    message: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
