//! Upload orchestration for pushing script images to remote mesh nodes.
//!
//! The radio transport only knows how to start a transfer and report back
//! later, with no timeout and no retry. This crate adds both:
//!
//! - a stall-check ticker that declares an attempt dead after a budget of
//!   ticks without a completion,
//! - bounded retries that reload the image and resend it,
//! - a single terminal [`Outcome`] per upload, delivered to a
//!   [`CompletionObserver`].
//!
//! The transport, the image loader and the observer are all traits, so the
//! orchestrator is exercised in tests with mocks and paused tokio time.

mod error;
pub mod observer;
pub mod orchestrator;
mod stall;
pub mod transport;
pub mod types;

pub use error::UploadError;
pub use observer::{ChannelObserver, CompletionObserver};
pub use orchestrator::UploadOrchestrator;
pub use transport::{TransferCompleter, TransferHandle, TransportSession};
pub use types::{
    NODE_ADDRESS_LEN, NodeAddress, Outcome, RetryReason, StateSnapshot, TransferAttempt,
    TransferResult, UploadEvent, UploadId, UploadRequest, UploaderConfig,
};
