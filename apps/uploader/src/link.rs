//! Simulated radio link.
//!
//! Stands in for the vendor transport when no hardware is attached: each
//! transfer reports after a size-dependent delay, and the first few can be
//! configured to vanish or time out so the retry path can be exercised.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use nodeflash_uploader::{NodeAddress, TransferHandle, TransferResult, TransportSession};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct LinkSettings {
    pub latency: Duration,
    pub bytes_per_sec: u32,
    pub lost_transfers: u32,
    pub timeout_transfers: u32,
}

pub struct SimulatedLink {
    settings: LinkSettings,
    started: AtomicU32,
}

impl SimulatedLink {
    pub fn new(settings: LinkSettings) -> Self {
        Self {
            settings,
            started: AtomicU32::new(0),
        }
    }

    fn airtime(&self, bytes: usize) -> Duration {
        let transfer = if self.settings.bytes_per_sec == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(bytes as f64 / f64::from(self.settings.bytes_per_sec))
        };
        self.settings.latency + transfer
    }
}

impl TransportSession for SimulatedLink {
    fn start_transfer(&self, target: NodeAddress, payload: Vec<u8>) -> TransferHandle {
        let n = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        let (completer, handle) = TransferHandle::channel();

        if n <= self.settings.lost_transfers {
            warn!(node = %target, transfer = n, "simulated link lost the transfer");
            drop(completer);
            return handle;
        }

        let result = if n <= self.settings.lost_transfers + self.settings.timeout_transfers {
            TransferResult::Timeout
        } else {
            TransferResult::Success
        };
        let delay = self.airtime(payload.len());
        debug!(node = %target, transfer = n, bytes = payload.len(), ?delay, ?result, "simulated transfer started");

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if completer.is_abandoned() {
                debug!(transfer = n, "nobody waiting for simulated transfer, dropping report");
                return;
            }
            completer.complete(result);
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: NodeAddress = NodeAddress::new([0x03, 0xF9, 0x5A]);

    fn settings() -> LinkSettings {
        LinkSettings {
            latency: Duration::from_millis(500),
            bytes_per_sec: 1000,
            lost_transfers: 0,
            timeout_transfers: 0,
        }
    }

    #[tokio::test]
    async fn completes_after_airtime() {
        tokio::time::pause();
        let link = SimulatedLink::new(settings());

        let start = tokio::time::Instant::now();
        let handle = link.start_transfer(ADDR, vec![0u8; 2000]);
        assert_eq!(handle.wait().await, Some(TransferResult::Success));
        assert_eq!(start.elapsed(), Duration::from_millis(2500));
    }

    #[tokio::test]
    async fn lost_then_timeout_then_success() {
        tokio::time::pause();
        let link = SimulatedLink::new(LinkSettings {
            lost_transfers: 1,
            timeout_transfers: 1,
            ..settings()
        });

        assert_eq!(link.start_transfer(ADDR, vec![1]).wait().await, None);
        assert_eq!(
            link.start_transfer(ADDR, vec![1]).wait().await,
            Some(TransferResult::Timeout)
        );
        assert_eq!(
            link.start_transfer(ADDR, vec![1]).wait().await,
            Some(TransferResult::Success)
        );
        assert_eq!(link.started.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn abandoned_transfer_is_not_reported() {
        tokio::time::pause();
        let link = SimulatedLink::new(settings());

        drop(link.start_transfer(ADDR, vec![1]));
        // Runs the reporting task to completion; it must not panic.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(link.started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_throughput_means_latency_only() {
        let link = SimulatedLink::new(LinkSettings {
            bytes_per_sec: 0,
            ..settings()
        });
        assert_eq!(link.airtime(1_000_000), Duration::from_millis(500));
    }
}
