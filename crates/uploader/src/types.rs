//! Data types shared by the orchestrator and its collaborators.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::UploadError;

/// Identifies one logical upload (all of its attempts).
pub type UploadId = Uuid;

/// Width of a node address in bytes.
pub const NODE_ADDRESS_LEN: usize = 3;

/// Mesh address of a remote node.
///
/// Displays as lowercase hex (`03f95a`). Parsing accepts plain hex, a
/// `0x` prefix, `\x` escapes and `:`/`.`/`-` separators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeAddress([u8; NODE_ADDRESS_LEN]);

impl NodeAddress {
    pub const fn new(bytes: [u8; NODE_ADDRESS_LEN]) -> Self {
        Self(bytes)
    }
}

impl From<[u8; NODE_ADDRESS_LEN]> for NodeAddress {
    fn from(bytes: [u8; NODE_ADDRESS_LEN]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for NodeAddress {
    type Error = UploadError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; NODE_ADDRESS_LEN] = bytes.try_into().map_err(|_| {
            UploadError::InvalidConfig(format!(
                "node address must be {NODE_ADDRESS_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for NodeAddress {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let trimmed = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let digits: String = trimmed
            .replace("\\x", "")
            .replace("\\X", "")
            .chars()
            .filter(|c| !matches!(c, ':' | '.' | '-'))
            .collect();

        let bytes = hex::decode(&digits)
            .map_err(|e| UploadError::InvalidConfig(format!("invalid node address {s:?}: {e}")))?;
        Self::try_from(bytes.as_slice())
    }
}

impl TryFrom<String> for NodeAddress {
    type Error = UploadError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<NodeAddress> for String {
    fn from(addr: NodeAddress) -> Self {
        addr.to_string()
    }
}

/// What the caller asked for: one image, one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub id: UploadId,
    pub target: NodeAddress,
    pub source: PathBuf,
}

impl UploadRequest {
    pub fn new(target: NodeAddress, source: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            source: source.into(),
        }
    }
}

/// A single send of a freshly loaded payload.
#[derive(Debug, Clone)]
pub struct TransferAttempt {
    pub payload: Vec<u8>,
    /// 1-based attempt number within the upload.
    pub attempt: u32,
    /// Orchestrator-wide tag; completions carrying an older tag are stale.
    pub generation: u64,
}

/// Result reported by the transport when a transfer finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferResult {
    Success,
    Timeout,
    /// Any other failure, with the transport's own status code.
    Failed(i32),
}

/// Terminal result of a logical upload. Exactly one per accepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    NoTransportConfigured,
    SourceNotFound,
    RetriesExhausted,
    TransportReportedTimeout,
    TransportReportedOtherFailure,
}

impl Outcome {
    /// Numeric result code: zero on success, negative otherwise.
    pub fn code(self) -> i32 {
        match self {
            Outcome::Success => 0,
            Outcome::NoTransportConfigured => -1,
            Outcome::SourceNotFound => -2,
            Outcome::RetriesExhausted => -3,
            Outcome::TransportReportedTimeout => -4,
            Outcome::TransportReportedOtherFailure => -5,
        }
    }

    pub fn is_success(self) -> bool {
        self == Outcome::Success
    }

    pub fn description(self) -> &'static str {
        match self {
            Outcome::Success => "script uploaded successfully",
            Outcome::NoTransportConfigured => "no transport configured",
            Outcome::SourceNotFound => "image could not be read",
            Outcome::RetriesExhausted => "maximum number of upload attempts exceeded",
            Outcome::TransportReportedTimeout => "transport reported a timeout",
            Outcome::TransportReportedOtherFailure => "transport reported a failure",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Orchestrator tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct UploaderConfig {
    /// Ticks without a completion before an attempt counts as stalled.
    pub wait_budget: u32,
    /// Total transfer attempts per upload, the first one included.
    pub max_attempts: u32,
    /// Period of the stall-check tick.
    pub tick_period: Duration,
    /// Treat a transport-reported timeout like a stall and retry it.
    /// Off by default: a reported timeout ends the upload with
    /// [`Outcome::TransportReportedTimeout`].
    pub retry_transport_timeouts: bool,
    /// Capacity of the [`UploadEvent`] channel.
    pub event_capacity: usize,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            wait_budget: 100,
            max_attempts: 3,
            tick_period: Duration::from_secs(1),
            retry_transport_timeouts: false,
            event_capacity: 64,
        }
    }
}

impl UploaderConfig {
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.wait_budget == 0 {
            return Err(UploadError::InvalidConfig(
                "wait_budget must be at least 1 tick".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(UploadError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.tick_period.is_zero() {
            return Err(UploadError::InvalidConfig(
                "tick_period must be non-zero".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(UploadError::InvalidConfig(
                "event_capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Upper bound on how long an upload can stay busy by stalling alone.
    pub fn worst_case_duration(&self) -> Duration {
        self.tick_period
            .saturating_mul(self.wait_budget)
            .saturating_mul(self.max_attempts)
    }
}

/// Point-in-time copy of the orchestrator's state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    pub busy: bool,
    pub request: Option<UploadRequest>,
    pub stall_remaining: u32,
    pub retry_count: u32,
    pub timer_armed: bool,
    /// Generation of the most recent attempt; never reset.
    pub generation: u64,
}

/// Why an attempt is being repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    Stall,
    TransportTimeout,
}

/// Progress notifications, emitted best-effort.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    AttemptStarted {
        upload_id: UploadId,
        attempt: u32,
        generation: u64,
        bytes: usize,
    },
    Stalled {
        upload_id: UploadId,
        attempt: u32,
    },
    Retrying {
        upload_id: UploadId,
        retry: u32,
        reason: RetryReason,
    },
    /// A completion arrived for an attempt that is no longer current.
    StaleCompletion {
        generation: u64,
        result: TransferResult,
    },
    Finished {
        upload_id: UploadId,
        outcome: Outcome,
        retries: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parses_escaped_bytes() {
        let addr: NodeAddress = "\\x03\\xF9\\x5A".parse().unwrap();
        assert_eq!(addr, NodeAddress::new([0x03, 0xF9, 0x5A]));
        assert_eq!(addr.to_string(), "03f95a");
    }

    #[test]
    fn address_parses_common_spellings() {
        let expected = NodeAddress::new([0x03, 0xF9, 0x5A]);
        for s in ["03f95a", "0x03F95A", "03:f9:5a", "03.F9.5A", " 03-f9-5a "] {
            assert_eq!(s.parse::<NodeAddress>().unwrap(), expected, "{s}");
        }
    }

    #[test]
    fn address_rejects_wrong_width_and_garbage() {
        assert!("03f9".parse::<NodeAddress>().is_err());
        assert!("03f95a01".parse::<NodeAddress>().is_err());
        assert!("zzzzzz".parse::<NodeAddress>().is_err());
        assert!(NodeAddress::try_from(&[1u8, 2][..]).is_err());
    }

    #[test]
    fn address_serializes_as_hex_string() {
        let addr = NodeAddress::new([0x03, 0xF9, 0x5A]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"03f95a\"");
        let back: NodeAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
        assert!(serde_json::from_str::<NodeAddress>("\"0102\"").is_err());
    }

    #[test]
    fn outcome_codes_are_distinct() {
        let all = [
            Outcome::Success,
            Outcome::NoTransportConfigured,
            Outcome::SourceNotFound,
            Outcome::RetriesExhausted,
            Outcome::TransportReportedTimeout,
            Outcome::TransportReportedOtherFailure,
        ];
        let codes: std::collections::HashSet<i32> = all.iter().map(|o| o.code()).collect();
        assert_eq!(codes.len(), all.len());
        assert_eq!(Outcome::Success.code(), 0);
        assert!(all[1..].iter().all(|o| o.code() < 0 && !o.is_success()));
    }

    #[test]
    fn outcome_serializes_snake_case() {
        let json = serde_json::to_string(&Outcome::RetriesExhausted).unwrap();
        assert_eq!(json, "\"retries_exhausted\"");
    }

    #[test]
    fn config_defaults_match_reference_uploader() {
        let config = UploaderConfig::default();
        assert_eq!(config.wait_budget, 100);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.tick_period, Duration::from_secs(1));
        assert!(!config.retry_transport_timeouts);
        assert!(config.validate().is_ok());
        assert_eq!(config.worst_case_duration(), Duration::from_secs(300));
    }

    #[test]
    fn config_validation_rejects_zeroes() {
        let bad = [
            UploaderConfig {
                wait_budget: 0,
                ..Default::default()
            },
            UploaderConfig {
                max_attempts: 0,
                ..Default::default()
            },
            UploaderConfig {
                tick_period: Duration::ZERO,
                ..Default::default()
            },
            UploaderConfig {
                event_capacity: 0,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(matches!(
                config.validate(),
                Err(UploadError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn requests_get_unique_ids() {
        let addr = NodeAddress::new([1, 2, 3]);
        let a = UploadRequest::new(addr, "a.spy");
        let b = UploadRequest::new(addr, "a.spy");
        assert_ne!(a.id, b.id);
    }
}
