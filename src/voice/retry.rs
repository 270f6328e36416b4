//! Retry policy: a bounded listening episode.
//!
//! An episode runs attempts one after another until a matching command is
//! heard or the attempt budget is spent. The episode can be abandoned at any
//! suspension point through its [`CancellationToken`]; an abandoned episode
//! drops its in-flight recognition request and reports nothing useful.

use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::listener::{CommandListener, RecognitionResult};

/// Attempt accounting for one episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryState {
    pub attempts_made: u32,
    pub max_attempts: u32,
}

impl RetryState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts_made: 0,
            max_attempts,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }

    /// Count one attempt. Returns false (and counts nothing) once exhausted.
    pub fn record_attempt(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.attempts_made += 1;
        true
    }
}

/// How an episode ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ListenOutcome {
    Matched { command: String, attempts: u32 },
    Exhausted { attempts: u32 },
    Abandoned { attempts: u32 },
}

/// Wraps a [`CommandListener`] in a bounded, sequential attempt loop.
#[derive(Clone)]
pub struct RetryPolicy {
    listener: CommandListener,
    max_attempts: u32,
    pause: Duration,
}

impl RetryPolicy {
    pub fn new(listener: CommandListener, max_attempts: u32) -> Self {
        Self {
            listener,
            max_attempts,
            pause: Duration::ZERO,
        }
    }

    /// Wait this long between two attempts of the same episode.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Listen until `matches` accepts a recognized command or the budget runs
    /// out. Short-circuits on the first match.
    pub async fn listen_with_retries<M>(&self, matches: M, cancel: &CancellationToken) -> ListenOutcome
    where
        M: Fn(&str) -> bool,
    {
        self.listen_observed(matches, cancel, |_, _| {}).await
    }

    /// Like [`listen_with_retries`](Self::listen_with_retries), reporting every
    /// finished attempt to `observe` before it is classified.
    pub async fn listen_observed<M, O>(
        &self,
        matches: M,
        cancel: &CancellationToken,
        mut observe: O,
    ) -> ListenOutcome
    where
        M: Fn(&str) -> bool,
        O: FnMut(&RetryState, &RecognitionResult),
    {
        let mut state = RetryState::new(self.max_attempts);

        while !state.is_exhausted() {
            if state.attempts_made > 0 && !self.pause.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return ListenOutcome::Abandoned { attempts: state.attempts_made };
                    }
                    _ = tokio::time::sleep(self.pause) => {}
                }
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(attempts = state.attempts_made, "Listening episode abandoned");
                    return ListenOutcome::Abandoned { attempts: state.attempts_made };
                }
                result = self.listener.listen_once() => result,
            };

            state.record_attempt();
            observe(&state, &result);

            if result.success
                && let Some(command) = result.command
                && matches(&command)
            {
                debug!(attempt = state.attempts_made, command = %command, "Command matched");
                return ListenOutcome::Matched {
                    command,
                    attempts: state.attempts_made,
                };
            }

            debug!(
                attempt = state.attempts_made,
                max = state.max_attempts,
                "No matching command"
            );
        }

        ListenOutcome::Exhausted {
            attempts: state.attempts_made,
        }
    }
}
