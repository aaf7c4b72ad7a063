use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use tracing::debug;

use crate::{DEFAULT_MAX_IMAGE_SIZE, ImageError, ImageLoader};

/// Loads images straight from the filesystem.
///
/// The container is treated as opaque bytes: the loader only checks that
/// the file exists, is non-empty and fits under the size limit.
#[derive(Debug, Clone)]
pub struct FileImageLoader {
    max_size: u64,
}

impl Default for FileImageLoader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IMAGE_SIZE)
    }
}

impl FileImageLoader {
    /// Creates a loader that rejects images larger than `max_size` bytes.
    pub fn new(max_size: u64) -> Self {
        Self { max_size }
    }
}

impl ImageLoader for FileImageLoader {
    fn load(&self, path: &Path) -> Result<Vec<u8>, ImageError> {
        let io_err = |source: io::Error| {
            if source.kind() == io::ErrorKind::NotFound {
                ImageError::NotFound(path.to_path_buf())
            } else {
                ImageError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        };

        let file = File::open(path).map_err(io_err)?;
        let size = file.metadata().map_err(io_err)?.len();
        if size > self.max_size {
            return Err(ImageError::TooLarge {
                size,
                limit: self.max_size,
            });
        }

        // The file may grow between metadata() and read; never read past the limit.
        let mut data = Vec::with_capacity(size as usize);
        file.take(self.max_size.saturating_add(1))
            .read_to_end(&mut data)
            .map_err(io_err)?;

        if data.len() as u64 > self.max_size {
            return Err(ImageError::TooLarge {
                size: data.len() as u64,
                limit: self.max_size,
            });
        }
        if data.is_empty() {
            return Err(ImageError::Empty(path.to_path_buf()));
        }

        debug!(path = %path.display(), bytes = data.len(), "image loaded");
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blink.spy");
        std::fs::write(&path, b"\x01\x02\x03script").unwrap();

        let data = FileImageLoader::default().load(&path).unwrap();
        assert_eq!(data, b"\x01\x02\x03script");
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileImageLoader::default()
            .load(&dir.path().join("missing.img"))
            .unwrap_err();
        assert!(matches!(err, ImageError::NotFound(_)));
        assert!(err.to_string().contains("missing.img"));
    }

    #[test]
    fn empty_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.spy");
        std::fs::write(&path, b"").unwrap();

        let err = FileImageLoader::default().load(&path).unwrap_err();
        assert!(matches!(err, ImageError::Empty(_)));
    }

    #[test]
    fn oversized_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.spy");
        std::fs::write(&path, vec![0xAAu8; 33]).unwrap();

        let err = FileImageLoader::new(32).load(&path).unwrap_err();
        match err {
            ImageError::TooLarge { size, limit } => {
                assert_eq!(size, 33);
                assert_eq!(limit, 32);
            }
            other => panic!("expected TooLarge, got {other:?}"),
        }
    }

    #[test]
    fn exact_limit_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fits.spy");
        std::fs::write(&path, vec![7u8; 32]).unwrap();

        assert_eq!(FileImageLoader::new(32).load(&path).unwrap().len(), 32);
    }

    #[test]
    fn unbounded_limit_loads_small_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.spy");
        std::fs::write(&path, b"\x01script").unwrap();

        let data = FileImageLoader::new(u64::MAX).load(&path).unwrap();
        assert_eq!(data, b"\x01script");
    }

    #[test]
    fn directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        // Opening a directory succeeds on Unix but reading it fails.
        let err = FileImageLoader::default().load(dir.path());
        assert!(err.is_err());
    }

    #[test]
    fn closures_are_loaders() {
        let loader = |_: &Path| -> Result<Vec<u8>, ImageError> { Ok(vec![1, 2, 3]) };
        assert_eq!(loader.load(Path::new("any")).unwrap(), vec![1, 2, 3]);
    }
}
