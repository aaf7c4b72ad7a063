//! Image loading for node uploads.
//!
//! The uploader never reads files itself: it asks an [`ImageLoader`] for
//! a fresh payload on every attempt. [`FileImageLoader`] is the stock
//! filesystem implementation.

mod info;
mod loader;

use std::path::{Path, PathBuf};

pub use info::{ImageInfo, checksum_bytes};
pub use loader::FileImageLoader;

/// Largest image accepted by default: 256 KiB.
///
/// Script images for the target nodes are a few KiB; anything near this
/// limit is almost certainly the wrong file.
pub const DEFAULT_MAX_IMAGE_SIZE: u64 = 256 * 1024;

/// Errors produced while loading an image.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("I/O error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image is empty: {}", .0.display())]
    Empty(PathBuf),

    #[error("image too large: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },
}

/// Source of upload-ready payloads.
///
/// Called once per transfer attempt. Implementations must release any
/// resource they acquire before returning, on both success and error.
pub trait ImageLoader: Send + Sync {
    /// Reads and decodes the image at `path`.
    fn load(&self, path: &Path) -> Result<Vec<u8>, ImageError>;
}

impl<F> ImageLoader for F
where
    F: Fn(&Path) -> Result<Vec<u8>, ImageError> + Send + Sync,
{
    fn load(&self, path: &Path) -> Result<Vec<u8>, ImageError> {
        self(path)
    }
}
