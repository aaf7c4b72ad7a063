//! Completion observer seam.

use tokio::sync::mpsc;
use tracing::warn;

use crate::types::Outcome;

/// Receives the single terminal [`Outcome`] of each upload.
///
/// Called on the orchestrator's event path: keep it short and never block.
pub trait CompletionObserver: Send + Sync {
    fn notify(&self, outcome: Outcome);
}

impl<F> CompletionObserver for F
where
    F: Fn(Outcome) + Send + Sync,
{
    fn notify(&self, outcome: Outcome) {
        self(outcome)
    }
}

/// Forwards outcomes into a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::Sender<Outcome>,
}

impl ChannelObserver {
    /// Creates an observer together with its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outcome>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl CompletionObserver for ChannelObserver {
    fn notify(&self, outcome: Outcome) {
        if let Err(e) = self.tx.try_send(outcome) {
            warn!(outcome = ?outcome, "failed to deliver upload outcome: {e}");
        }
    }
}
