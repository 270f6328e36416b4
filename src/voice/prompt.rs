//! Prompt player: fire-and-forget speech for flow prompts.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::speech::SpeechSynthesizer;

/// Speaks prompts through the synthesis backend.
///
/// Prompts are advisory: a failed dispatch is logged and the flow carries on
/// as if the prompt had been spoken.
#[derive(Clone)]
pub struct PromptPlayer {
    synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl PromptPlayer {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        Self { synthesizer }
    }

    /// Dispatch one utterance. Returns whether the backend accepted it.
    pub async fn speak(&self, utterance: &str) -> bool {
        match self.synthesizer.synthesize(utterance).await {
            Ok(()) => {
                debug!(utterance, "Prompt dispatched");
                true
            }
            Err(e) => {
                warn!(utterance, error = %e, "Prompt dispatch failed, continuing");
                false
            }
        }
    }

    /// Speak each utterance in order, starting the next only after the
    /// previous dispatch resolved.
    pub async fn speak_all<I, S>(&self, utterances: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for utterance in utterances {
            self.speak(utterance.as_ref()).await;
        }
    }
}
