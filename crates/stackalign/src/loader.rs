use std::path::{Path, PathBuf};
use std::sync::Arc;

use stackalign_image::Image;
use stackalign_imgproc::normalize::normalize_contrast;
use stackalign_imgproc::resize::downsample;
use stackalign_io::{ImageSource, IoError, SoftCache};

use crate::config::CacheConfig;
use crate::error::ExtractError;

/// Blur assumed to be present in the acquired images.
const SOURCE_SIGMA: f32 = 0.5;

/// Blur of the downsampled images, relative to their own pixel grid.
const TARGET_SIGMA: f32 = 1.6;

/// Loads section images through an [`ImageSource`], memoizing decoded and
/// downsampled copies in bounded caches keyed by path.
pub struct ImageLoader {
    source: Arc<dyn ImageSource>,
    raw: SoftCache<PathBuf, Arc<Image<u16>>>,
    scaled: SoftCache<(PathBuf, u64), Arc<Image<f32>>>,
}

impl ImageLoader {
    /// Create a loader over `source` with the given cache capacities.
    pub fn new(source: Arc<dyn ImageSource>, cache: &CacheConfig) -> Self {
        Self {
            source,
            raw: SoftCache::new(cache.images),
            scaled: SoftCache::new(cache.downsampled),
        }
    }

    /// The underlying image source.
    pub fn source(&self) -> &Arc<dyn ImageSource> {
        &self.source
    }

    /// The decoded full resolution image.
    pub fn load(&self, path: &Path) -> Result<Arc<Image<u16>>, IoError> {
        self.raw.get_or_try_insert_with(&path.to_path_buf(), || {
            log::debug!("loading {}", path.display());
            self.source.load(path).map(Arc::new)
        })
    }

    /// The image downsampled to `scale` and stretched to `[0, 1]`.
    pub fn load_scaled(&self, path: &Path, scale: f64) -> Result<Arc<Image<f32>>, ExtractError> {
        let key = (path.to_path_buf(), scale.to_bits());
        self.scaled.get_or_try_insert_with(&key, || {
            let raw = self.load(path)?;
            let mut scaled = downsample(&raw.to_f32(), scale, SOURCE_SIGMA, TARGET_SIGMA)?;
            normalize_contrast(&mut scaled);
            Ok(Arc::new(scaled))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackalign_io::InMemoryImageSource;

    #[test]
    fn caches_and_scales() -> Result<(), ExtractError> {
        let mut source = InMemoryImageSource::new();
        let data = (0..100u16).map(|v| v * 10).collect();
        source.insert("a.tif", Image::new([10, 10].into(), data)?);

        let loader = ImageLoader::new(Arc::new(source), &CacheConfig::default());
        let first = loader.load(Path::new("a.tif"))?;
        let second = loader.load(Path::new("a.tif"))?;
        assert!(Arc::ptr_eq(&first, &second));

        let scaled = loader.load_scaled(Path::new("a.tif"), 0.5)?;
        assert_eq!(scaled.size(), [5, 5].into());
        let (lo, hi) = scaled.min_max().unwrap_or((f32::NAN, f32::NAN));
        assert_eq!(lo, 0.0);
        assert_eq!(hi, 1.0);

        let full = loader.load_scaled(Path::new("a.tif"), 1.0)?;
        assert_eq!(full.as_slice()[0], 0.0);
        assert_eq!(full.as_slice()[99], 1.0);

        assert!(matches!(
            loader.load(Path::new("missing.tif")),
            Err(IoError::FileDoesNotExist(_))
        ));
        Ok(())
    }
}
