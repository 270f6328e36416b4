//! Error types for the voice coach.

use crate::flow::Step;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Speech error: {0}")]
    Speech(#[from] SpeechError),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures talking to the speech backends.
///
/// None of these are fatal: the prompt player and the command listener log
/// them and carry on as if the utterance was spoken / nothing was heard.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("Speech synthesis failed: {reason}")]
    SynthesisFailed { reason: String },

    #[error("Speech recognition failed: {reason}")]
    RecognitionFailed { reason: String },

    #[error("Speech service returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Invalid response from speech service: {0}")]
    InvalidResponse(String),
}

/// Flow lifecycle and plan errors.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Invalid flow plan: {0}")]
    InvalidPlan(String),

    #[error("Flow {flow} cannot transition from {from} to {to}")]
    InvalidTransition { flow: String, from: Step, to: Step },

    #[error("Flow {flow} is already running")]
    AlreadyRunning { flow: String },

    #[error("Flow {flow} is not running")]
    NotRunning { flow: String },

    #[error("Unknown flow: {0}")]
    UnknownFlow(String),
}

/// Result type alias for the voice coach.
pub type Result<T> = std::result::Result<T, Error>;
