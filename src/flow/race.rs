//! Input race resolver: first of {timeout, recognized match, click} wins.
//!
//! Each step entry arms a new round and hands out a [`Ticket`]. Every deferred
//! callback of that step carries the ticket back; the first one to
//! [`claim`](RaceResolver::claim) it wins and the round's cancellation token
//! fires, abandoning every other participant. Any later claim, from this
//! round or an older one, is refused.

use tokio_util::sync::CancellationToken;

/// Identifies the step entry a deferred event was armed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(pub(crate) u64);

impl Ticket {
    pub fn round(&self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
pub struct RaceResolver {
    round: u64,
    settled: bool,
    cancel: CancellationToken,
}

impl Default for RaceResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl RaceResolver {
    /// A resolver with no open round; nothing can be claimed until `arm`.
    pub fn new() -> Self {
        let cancel = CancellationToken::new();
        cancel.cancel();
        Self {
            round: 0,
            settled: true,
            cancel,
        }
    }

    /// Close the current round (abandoning its participants) and open a new one.
    pub fn arm(&mut self) -> Ticket {
        self.cancel.cancel();
        self.round += 1;
        self.settled = false;
        self.cancel = CancellationToken::new();
        Ticket(self.round)
    }

    /// Ticket of the current round.
    pub fn ticket(&self) -> Ticket {
        Ticket(self.round)
    }

    /// Token cancelled as soon as the current round is settled or replaced.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether events carrying `ticket` may still have an effect.
    pub fn is_live(&self, ticket: Ticket) -> bool {
        !self.settled && ticket.0 == self.round
    }

    /// Try to win the round. True exactly once per round, and only for its
    /// own ticket.
    pub fn claim(&mut self, ticket: Ticket) -> bool {
        if !self.is_live(ticket) {
            return false;
        }
        self.settled = true;
        self.cancel.cancel();
        true
    }

    /// Settle the current round without a winner.
    pub fn abandon(&mut self) {
        self.settled = true;
        self.cancel.cancel();
    }
}

impl Drop for RaceResolver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
