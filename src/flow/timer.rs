//! Single-slot deferred timer.
//!
//! A [`TimerSlot`] holds at most one live timer. Scheduling a new one cancels
//! the previous one first, so a stale timer can never fire into a step it was
//! not armed for. Dropping the slot cancels whatever is live.

use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::debug;

/// Schedule/cancel/fire counters.
///
/// `scheduled - cancelled - fired` is the number of live timers and is never
/// more than one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimerStats {
    pub scheduled: u64,
    pub cancelled: u64,
    pub fired: u64,
}

impl TimerStats {
    pub fn live(&self) -> u64 {
        self.scheduled - self.cancelled - self.fired
    }
}

/// Owns the one pending timer of a flow session.
#[derive(Debug, Default)]
pub struct TimerSlot {
    live: Option<JoinHandle<()>>,
    stats: TimerStats,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `on_fire` after `delay`, replacing any live timer.
    pub fn schedule<F>(&mut self, delay: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        self.live = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire();
        }));
        self.stats.scheduled += 1;
        debug!(delay_ms = delay.as_millis() as u64, "Timer scheduled");
    }

    /// Cancel the live timer, if any. Returns whether one was live.
    pub fn cancel(&mut self) -> bool {
        match self.live.take() {
            Some(handle) => {
                handle.abort();
                self.stats.cancelled += 1;
                debug!("Timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Retire the live timer after its callback ran.
    pub fn mark_fired(&mut self) -> bool {
        if self.live.take().is_some() {
            self.stats.fired += 1;
            true
        } else {
            false
        }
    }

    pub fn stats(&self) -> TimerStats {
        self.stats
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.live.take() {
            handle.abort();
        }
    }
}
