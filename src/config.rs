//! Configuration types.
//!
//! Runtime settings come from the environment; flow plans come from the
//! built-in presets or a JSON file named by `VOICE_COACH_FLOWS_FILE`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, FlowError};
use crate::flow::Step;

/// Name of the flow that greets the user and waits for "start".
pub const START_FLOW: &str = "start";
/// Name of the flow that asks how the user can interact.
pub const INTAKE_FLOW: &str = "intake";

fn lookup_parsed<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}

fn lookup_non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Where the speech backend lives and how to reach it.
#[derive(Clone)]
pub struct SpeechConfig {
    pub base_url: String,
    pub synthesis_path: String,
    pub recognition_path: String,
    /// Optional bearer token sent with every request.
    pub api_key: Option<SecretString>,
    pub request_timeout: Duration,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            synthesis_path: "/api/text-to-speech".to_string(),
            recognition_path: "/api/speech-to-text".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for SpeechConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeechConfig")
            .field("base_url", &self.base_url)
            .field("synthesis_path", &self.synthesis_path)
            .field("recognition_path", &self.recognition_path)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl SpeechConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let timeout_secs: u64 = lookup_parsed(
            &lookup,
            "VOICE_COACH_SPEECH_TIMEOUT_SECS",
            defaults.request_timeout.as_secs(),
        )?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "VOICE_COACH_SPEECH_TIMEOUT_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            base_url: lookup_non_empty(&lookup, "VOICE_COACH_SPEECH_URL")
                .unwrap_or(defaults.base_url),
            synthesis_path: lookup_non_empty(&lookup, "VOICE_COACH_TTS_PATH")
                .unwrap_or(defaults.synthesis_path),
            recognition_path: lookup_non_empty(&lookup, "VOICE_COACH_STT_PATH")
                .unwrap_or(defaults.recognition_path),
            api_key: lookup_non_empty(&lookup, "VOICE_COACH_SPEECH_KEY").map(SecretString::from),
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn synthesis_url(&self) -> String {
        join_url(&self.base_url, &self.synthesis_path)
    }

    pub fn recognition_url(&self) -> String {
        join_url(&self.base_url, &self.recognition_path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Process-level settings for the binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Flow started at boot, if any.
    pub entry_flow: Option<String>,
    pub flows_file: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            entry_flow: Some(START_FLOW.to_string()),
            flows_file: None,
            log_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        // Set-but-empty entry flow means "don't auto-start anything".
        let entry_flow = match lookup("VOICE_COACH_ENTRY_FLOW") {
            Some(raw) => Some(raw.trim().to_string()).filter(|v| !v.is_empty()),
            None => defaults.entry_flow,
        };

        Ok(Self {
            port: lookup_parsed(&lookup, "VOICE_COACH_PORT", defaults.port)?,
            entry_flow,
            flows_file: lookup_non_empty(&lookup, "VOICE_COACH_FLOWS_FILE").map(PathBuf::from),
            log_dir: lookup_non_empty(&lookup, "VOICE_COACH_LOG_DIR").map(PathBuf::from),
        })
    }

    /// Plans from `flows_file`, or the presets when none is configured.
    /// Every plan is validated before it is handed out.
    pub fn load_plans(&self) -> crate::error::Result<BTreeMap<String, FlowPlan>> {
        let plans = match &self.flows_file {
            Some(path) => FlowPlan::load_file(path)?,
            None => FlowPlan::presets(),
        };
        for plan in plans.values() {
            plan.validate()?;
        }
        Ok(plans)
    }
}

fn default_max_attempts() -> u32 {
    2
}

/// Step 1: wait for a click, or move on when the timer fires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VisualAckPlan {
    pub prompt: String,
    pub timeout_ms: u64,
    /// Where a click sends the user.
    pub destination: String,
}

impl VisualAckPlan {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Step 2: listen for a spoken phrase with a bounded number of attempts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerbalAckPlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Expected command, compared after normalization.
    pub phrase: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Pause between two attempts of the same episode.
    #[serde(default)]
    pub attempt_pause_ms: u64,
    /// Grace period after the prompt before the first attempt, so the
    /// microphone does not pick up the prompt itself.
    #[serde(default)]
    pub listen_after_ms: u64,
    pub timeout_ms: u64,
    /// Where a recognized phrase sends the user.
    pub destination: String,
}

impl VerbalAckPlan {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn attempt_pause(&self) -> Duration {
        Duration::from_millis(self.attempt_pause_ms)
    }

    pub fn listen_after(&self) -> Duration {
        Duration::from_millis(self.listen_after_ms)
    }
}

/// Everything that distinguishes one onboarding flow from another.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlowPlan {
    /// Prompts spoken in order on entering the intro step.
    #[serde(default)]
    pub intro: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_ack: Option<VisualAckPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbal_ack: Option<VerbalAckPlan>,
    /// Accept clicks in every running step and send the user here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click_anywhere: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_prompt: Option<String>,
}

impl FlowPlan {
    /// The landing flow: say "start" or click anywhere.
    pub fn start() -> Self {
        Self {
            intro: vec!["Are you ready? Please say START or Click to begin the session.".to_string()],
            visual_ack: None,
            verbal_ack: Some(VerbalAckPlan {
                prompt: None,
                phrase: "start".to_string(),
                max_attempts: 4,
                attempt_pause_ms: 2_000,
                listen_after_ms: 4_000,
                timeout_ms: 12_000,
                destination: "next".to_string(),
            }),
            click_anywhere: Some("next".to_string()),
            fallback_prompt: None,
        }
    }

    /// The intake flow: find out whether the user can see or speak.
    pub fn intake() -> Self {
        Self {
            intro: vec![
                "Welcome to your AI Coach Assistant".to_string(),
                "Let me know a little more about you".to_string(),
                "Tell us about your disability so we can customize your coaching experience"
                    .to_string(),
            ],
            visual_ack: Some(VisualAckPlan {
                prompt: "If you're able to see, please click the button. Otherwise, wait until the next step."
                    .to_string(),
                timeout_ms: 20_000,
                destination: "userinterface1".to_string(),
            }),
            verbal_ack: Some(VerbalAckPlan {
                prompt: Some(
                    "If you're able to speak, please say Hello. Otherwise, wait until the next step."
                        .to_string(),
                ),
                phrase: "hello".to_string(),
                max_attempts: 2,
                attempt_pause_ms: 0,
                listen_after_ms: 0,
                timeout_ms: 20_000,
                destination: "userinterface2".to_string(),
            }),
            click_anywhere: None,
            fallback_prompt: Some(
                "If you're not able to do any of the above, just move your head down.".to_string(),
            ),
        }
    }

    /// Built-in plans keyed by flow name.
    pub fn presets() -> BTreeMap<String, FlowPlan> {
        BTreeMap::from([
            (START_FLOW.to_string(), Self::start()),
            (INTAKE_FLOW.to_string(), Self::intake()),
        ])
    }

    /// Load a JSON object of `name → plan`.
    pub fn load_file(path: &Path) -> Result<BTreeMap<String, FlowPlan>, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse_many(&raw)
    }

    pub fn parse_many(raw: &str) -> Result<BTreeMap<String, FlowPlan>, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), FlowError> {
        if self.visual_ack.is_none() && self.verbal_ack.is_none() {
            return Err(FlowError::InvalidPlan(
                "a flow needs a visual or a verbal acknowledgment step".to_string(),
            ));
        }
        if let Some(visual) = &self.visual_ack {
            if visual.timeout_ms == 0 {
                return Err(FlowError::InvalidPlan("visual timeout must be non-zero".to_string()));
            }
            if visual.destination.trim().is_empty() {
                return Err(FlowError::InvalidPlan("visual destination is empty".to_string()));
            }
        }
        if let Some(verbal) = &self.verbal_ack {
            if crate::voice::CommandMatcher::phrase(&verbal.phrase).is_empty() {
                return Err(FlowError::InvalidPlan("verbal phrase is empty".to_string()));
            }
            if verbal.max_attempts == 0 {
                return Err(FlowError::InvalidPlan(
                    "verbal max_attempts must be at least 1".to_string(),
                ));
            }
            if verbal.timeout_ms == 0 {
                return Err(FlowError::InvalidPlan("verbal timeout must be non-zero".to_string()));
            }
            if verbal.destination.trim().is_empty() {
                return Err(FlowError::InvalidPlan("verbal destination is empty".to_string()));
            }
        }
        if let Some(dest) = &self.click_anywhere
            && dest.trim().is_empty()
        {
            return Err(FlowError::InvalidPlan("click destination is empty".to_string()));
        }
        Ok(())
    }

    /// Step entered once the intro prompts have been spoken.
    pub fn after_intro(&self) -> Step {
        if self.visual_ack.is_some() {
            Step::AwaitVisualAck
        } else {
            Step::AwaitVerbalAck
        }
    }

    /// Step entered when nobody clicked in time.
    pub fn after_visual_timeout(&self) -> Step {
        if self.verbal_ack.is_some() {
            Step::AwaitVerbalAck
        } else {
            Step::Intro
        }
    }

    /// Destination of a click delivered while `step` is active, if the step
    /// listens for one.
    pub fn click_destination(&self, step: Step) -> Option<&str> {
        if step.is_terminal() {
            return None;
        }
        if step == Step::AwaitVisualAck
            && let Some(visual) = &self.visual_ack
        {
            return Some(visual.destination.as_str());
        }
        self.click_anywhere.as_deref()
    }
}
