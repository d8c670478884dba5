use std::collections::HashMap;
use std::path::{Path, PathBuf};

use stackalign_image::{Image, ImageSize};

use crate::error::IoError;
use crate::tiff::read_image_tiff_mono16;

/// A collaborator that decodes section images.
///
/// Every image of a series is expected to share the same size and pixel type.
pub trait ImageSource: Send + Sync {
    /// Load the image stored at `path`.
    fn load(&self, path: &Path) -> Result<Image<u16>, IoError>;
}

/// Loads 8 or 16-bit grayscale TIFF files.
#[derive(Debug, Clone, Copy, Default)]
pub struct TiffImageSource;

impl ImageSource for TiffImageSource {
    fn load(&self, path: &Path) -> Result<Image<u16>, IoError> {
        read_image_tiff_mono16(path)
    }
}

/// Loads headerless (or fixed header) 16-bit raw files of a known size.
#[derive(Debug, Clone, Copy)]
pub struct RawImageSource {
    /// Size of every image.
    pub size: ImageSize,
    /// Number of bytes to skip at the start of the file.
    pub header: usize,
    /// Whether samples are stored big endian.
    pub big_endian: bool,
}

impl RawImageSource {
    /// Create a little endian raw source without header.
    pub fn new(size: ImageSize) -> Self {
        Self {
            size,
            header: 0,
            big_endian: false,
        }
    }
}

impl ImageSource for RawImageSource {
    fn load(&self, path: &Path) -> Result<Image<u16>, IoError> {
        if !path.exists() {
            return Err(IoError::FileDoesNotExist(path.to_path_buf()));
        }

        let bytes = std::fs::read(path)?;
        let expected = self.header + self.size.area() * 2;
        if bytes.len() != expected {
            return Err(IoError::InvalidRawSize {
                path: path.to_path_buf(),
                expected,
                actual: bytes.len(),
            });
        }

        let data = bytes[self.header..]
            .chunks_exact(2)
            .map(|b| {
                if self.big_endian {
                    u16::from_be_bytes([b[0], b[1]])
                } else {
                    u16::from_le_bytes([b[0], b[1]])
                }
            })
            .collect();
        Ok(Image::new(self.size, data)?)
    }
}

/// Serves images held in memory, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct InMemoryImageSource {
    images: HashMap<PathBuf, Image<u16>>,
}

impl InMemoryImageSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image under `path`.
    pub fn insert(&mut self, path: impl Into<PathBuf>, image: Image<u16>) {
        self.images.insert(path.into(), image);
    }
}

impl ImageSource for InMemoryImageSource {
    fn load(&self, path: &Path) -> Result<Image<u16>, IoError> {
        self.images
            .get(path)
            .cloned()
            .ok_or_else(|| IoError::FileDoesNotExist(path.to_path_buf()))
    }
}
