//! Stall-check ticker.
//!
//! The transport never times out on its own, so the orchestrator polls:
//! a background task sends a tick every period until it is disarmed.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::orchestrator::Command;
use crate::types::UploadId;

/// Owns the ticker task for the upload in progress.
#[derive(Debug, Default)]
pub(crate) struct StallTimer {
    cancel: Option<CancellationToken>,
}

impl StallTimer {
    /// Starts ticking for `upload_id`, replacing any previous ticker.
    pub(crate) fn arm(
        &mut self,
        upload_id: UploadId,
        period: Duration,
        commands: mpsc::WeakSender<Command>,
    ) {
        self.disarm();
        let cancel = CancellationToken::new();
        tokio::spawn(tick_pump(upload_id, period, commands, cancel.clone()));
        self.cancel = Some(cancel);
    }

    pub(crate) fn disarm(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for StallTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// Sends `Command::Tick` every `period` until cancelled or the orchestrator
/// goes away. Holds only a weak sender so it never keeps the actor alive.
async fn tick_pump(
    upload_id: UploadId,
    period: Duration,
    commands: mpsc::WeakSender<Command>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let Some(tx) = commands.upgrade() else { break };
                if tx.send(Command::Tick { upload_id }).await.is_err() {
                    break;
                }
            }
        }
    }

    trace!(upload = %upload_id, "stall ticker stopped");
}
