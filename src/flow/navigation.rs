//! Navigation collaborator: where a finished session hands the user off.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

/// Receives the named destination when a session exits.
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn go_to(&self, flow: &str, destination: &str);
}

/// A navigation request forwarded over a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Handoff {
    /// Flow that exited.
    pub flow: String,
    pub destination: String,
}

/// Forwards every navigation to an mpsc consumer (the binary's handoff loop).
#[derive(Debug, Clone)]
pub struct ChannelNavigator {
    tx: mpsc::UnboundedSender<Handoff>,
}

impl ChannelNavigator {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Handoff>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Navigator for ChannelNavigator {
    async fn go_to(&self, flow: &str, destination: &str) {
        let handoff = Handoff {
            flow: flow.to_string(),
            destination: destination.to_string(),
        };
        if self.tx.send(handoff).is_err() {
            warn!(flow, destination, "Navigation consumer is gone, handoff dropped");
        }
    }
}
