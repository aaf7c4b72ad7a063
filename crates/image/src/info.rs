use sha2::{Digest, Sha256};

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Summary of a loaded payload, for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub size: usize,
    pub sha256: String,
}

impl ImageInfo {
    pub fn of(payload: &[u8]) -> Self {
        Self {
            size: payload.len(),
            sha256: checksum_bytes(payload),
        }
    }

    /// First 12 hex digits of the digest.
    pub fn short_digest(&self) -> &str {
        &self.sha256[..self.sha256.len().min(12)]
    }
}
