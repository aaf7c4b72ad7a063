//! Transport session seam.
//!
//! The radio stack is an external collaborator: it starts a transfer and
//! reports back once, some time later. It offers no timeout and no
//! cancellation; the orchestrator layers both on top.

use tokio::sync::oneshot;

use crate::types::{NodeAddress, TransferResult};

/// Asynchronous "start now, report later" upload primitive.
///
/// Implementations must not block: kick the transfer off and return the
/// handle. The matching [`TransferCompleter`] is resolved from whatever
/// context the transport runs on.
pub trait TransportSession: Send + Sync {
    fn start_transfer(&self, target: NodeAddress, payload: Vec<u8>) -> TransferHandle;
}

/// Receiving side of a started transfer.
#[derive(Debug)]
pub struct TransferHandle {
    rx: oneshot::Receiver<TransferResult>,
}

/// Transport-side completion hook. Consumed on use, so a transfer can
/// report at most once.
#[derive(Debug)]
pub struct TransferCompleter {
    tx: oneshot::Sender<TransferResult>,
}

impl TransferHandle {
    /// Creates a linked completer/handle pair.
    pub fn channel() -> (TransferCompleter, TransferHandle) {
        let (tx, rx) = oneshot::channel();
        (TransferCompleter { tx }, TransferHandle { rx })
    }

    /// Waits for the transport's report.
    ///
    /// Returns `None` if the completer was dropped without reporting;
    /// from the orchestrator's point of view that transfer never ends.
    pub async fn wait(self) -> Option<TransferResult> {
        self.rx.await.ok()
    }
}

impl TransferCompleter {
    pub fn complete(self, result: TransferResult) {
        // Receiver gone means nobody cares any more.
        let _ = self.tx.send(result);
    }

    /// True once the orchestrator side has stopped listening.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completion_reaches_handle() {
        let (completer, handle) = TransferHandle::channel();
        completer.complete(TransferResult::Failed(7));
        assert_eq!(handle.wait().await, Some(TransferResult::Failed(7)));
    }

    #[tokio::test]
    async fn dropped_completer_never_completes() {
        let (completer, handle) = TransferHandle::channel();
        drop(completer);
        assert_eq!(handle.wait().await, None);
    }

    #[test]
    fn completer_sees_dropped_handle() {
        let (completer, handle) = TransferHandle::channel();
        assert!(!completer.is_abandoned());
        drop(handle);
        assert!(completer.is_abandoned());
    }
}
