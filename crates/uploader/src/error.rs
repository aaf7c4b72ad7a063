//! Uploader error types.

/// Errors returned directly to callers of the orchestrator handle.
///
/// Upload failures are never reported here: they arrive as an
/// [`Outcome`](crate::Outcome) at the completion observer.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("an upload is already in progress")]
    Busy,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("orchestrator stopped")]
    Closed,
}
