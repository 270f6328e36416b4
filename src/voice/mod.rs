//! Voice primitives used by the flow: speaking prompts, hearing commands,
//! and bounded listening episodes.

pub mod listener;
pub mod prompt;
pub mod retry;

pub use listener::{CommandListener, CommandMatcher, RecognitionResult, normalize_command};
pub use prompt::PromptPlayer;
pub use retry::{ListenOutcome, RetryPolicy, RetryState};
