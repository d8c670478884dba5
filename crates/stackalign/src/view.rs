//! Lazy access to an aligned section stack.
//!
//! Nothing is rendered up front. A [`TileWorker`] loads one section when asked,
//! places it at the rounded translation of its transform and writes the result
//! into a scratch buffer it owns. The buffer is reused by the next request on
//! the same worker, so callers copy what they need to keep.

use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use stackalign_image::{Image, ImageSize};
use stackalign_models::Model;

use crate::error::AlignError;
use crate::loader::ImageLoader;

/// A virtual `width x height x depth` volume of aligned sections.
pub struct AlignedVolumeView {
    loader: Arc<ImageLoader>,
    paths: Vec<PathBuf>,
    offsets: Vec<[isize; 2]>,
    tile_size: ImageSize,
}

/// Integer placement of a translation, `floor(t + 0.5)`.
fn placement(t: f64) -> isize {
    (t + 0.5).floor() as isize
}

impl AlignedVolumeView {
    /// Create a view over `paths` placed by `transforms` on tiles of `tile_size`.
    ///
    /// Only the translation of every transform is used; its sub-pixel part is
    /// discarded.
    pub fn new<M: Model<2>>(
        loader: Arc<ImageLoader>,
        paths: Vec<PathBuf>,
        transforms: &[M],
        tile_size: ImageSize,
    ) -> Result<Self, AlignError> {
        if paths.len() != transforms.len() {
            return Err(AlignError::LengthMismatch {
                left_name: "paths",
                left: paths.len(),
                right_name: "transforms",
                right: transforms.len(),
            });
        }

        let offsets = transforms
            .iter()
            .map(|t| {
                let m = t.to_matrix();
                [placement(m[2]), placement(m[5])]
            })
            .collect();

        Ok(Self {
            loader,
            paths,
            offsets,
            tile_size,
        })
    }

    /// Number of sections.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether the view has no sections.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// The volume dimensions `[width, height, depth]`.
    pub fn dimensions(&self) -> [usize; 3] {
        [self.tile_size.width, self.tile_size.height, self.paths.len()]
    }

    /// The integer placement of section `index`.
    pub fn offset(&self, index: usize) -> Option<[isize; 2]> {
        self.offsets.get(index).copied()
    }

    /// A worker owning its own scratch buffer.
    pub fn worker(&self) -> Result<TileWorker<'_>, AlignError> {
        Ok(TileWorker {
            view: self,
            scratch: Image::from_size_val(self.tile_size, 0)?,
        })
    }

    /// Render section `index` into a new image.
    pub fn materialize_tile(&self, index: usize) -> Result<Image<u16>, AlignError> {
        let mut worker = self.worker()?;
        Ok(worker.get_tile(index)?.clone())
    }

    /// Render every section in parallel, one scratch buffer per rayon worker.
    ///
    /// `f` sees each tile only for the duration of the call.
    pub fn par_for_each_tile<F, E>(&self, f: F) -> Result<(), E>
    where
        F: Fn(usize, &Image<u16>) -> Result<(), E> + Sync,
        E: From<AlignError> + Send,
    {
        (0..self.len())
            .into_par_iter()
            .map_init(
                || self.worker(),
                |worker, index| {
                    let worker = worker.as_mut().map_err(|e| {
                        E::from(AlignError::Collaborator {
                            stage: "allocate tile",
                            message: e.to_string(),
                        })
                    })?;
                    let tile = worker.get_tile(index)?;
                    f(index, tile)
                },
            )
            .collect()
    }
}

/// Renders tiles of an [`AlignedVolumeView`] into a reused buffer.
pub struct TileWorker<'a> {
    view: &'a AlignedVolumeView,
    scratch: Image<u16>,
}

impl TileWorker<'_> {
    /// Render section `index`, zero padded where it does not cover the tile.
    ///
    /// The returned image is overwritten by the next call on this worker.
    pub fn get_tile(&mut self, index: usize) -> Result<&Image<u16>, AlignError> {
        let view = self.view;
        let (Some(path), Some(&[dx, dy])) = (view.paths.get(index), view.offsets.get(index))
        else {
            return Err(AlignError::InvalidTileIndex {
                index,
                len: view.len(),
            });
        };

        let section = view.loader.load(path)?;
        let width = view.tile_size.width;

        for (y, row) in self
            .scratch
            .as_slice_mut()
            .chunks_exact_mut(width.max(1))
            .enumerate()
        {
            let sy = y as isize - dy;
            for (x, out) in row.iter_mut().enumerate() {
                *out = section
                    .get_signed(x as isize - dx, sy)
                    .copied()
                    .unwrap_or(0);
            }
        }

        Ok(&self.scratch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use stackalign_io::InMemoryImageSource;
    use stackalign_models::TranslationModel2d;

    fn view(translations: &[[f64; 2]]) -> Result<AlignedVolumeView, AlignError> {
        let mut source = InMemoryImageSource::new();
        let mut paths = Vec::new();
        for i in 0..translations.len() {
            let data = (0..12u16).map(|v| v + 1 + 100 * i as u16).collect();
            let path = PathBuf::from(format!("s{i}.tif"));
            source.insert(path.clone(), Image::new([4, 3].into(), data)?);
            paths.push(path);
        }
        let loader = Arc::new(ImageLoader::new(Arc::new(source), &CacheConfig::default()));
        let models = translations
            .iter()
            .map(|&t| TranslationModel2d::new(t))
            .collect::<Vec<_>>();
        AlignedVolumeView::new(loader, paths, &models, [4, 3].into())
    }

    #[test]
    fn identity_placement() -> Result<(), AlignError> {
        let view = view(&[[0.0, 0.0]])?;
        assert_eq!(view.dimensions(), [4, 3, 1]);
        let tile = view.materialize_tile(0)?;
        assert_eq!(tile.as_slice(), &(1..=12).collect::<Vec<u16>>()[..]);
        Ok(())
    }

    #[test]
    fn rounded_translation_with_zero_padding() -> Result<(), AlignError> {
        // 1.5 rounds up, -0.4 rounds to zero
        let view = view(&[[1.5, -0.4]])?;
        assert_eq!(view.offset(0), Some([2, 0]));

        let tile = view.materialize_tile(0)?;
        assert_eq!(
            tile.as_slice(),
            &[
                0, 0, 1, 2, //
                0, 0, 5, 6, //
                0, 0, 9, 10,
            ]
        );
        Ok(())
    }

    #[test]
    fn translation_beyond_bounds_is_all_zero() -> Result<(), AlignError> {
        let view = view(&[[0.0, 10.0]])?;
        let tile = view.materialize_tile(0)?;
        assert!(tile.as_slice().iter().all(|&v| v == 0));
        Ok(())
    }

    #[test]
    fn worker_reuses_buffer() -> Result<(), AlignError> {
        let view = view(&[[0.0, 0.0], [0.0, -1.0]])?;
        let mut worker = view.worker()?;

        let first = worker.get_tile(0)?.clone();
        let second = worker.get_tile(1)?;
        assert_ne!(&first, second);
        assert_eq!(&second.as_slice()[..4], &[105, 106, 107, 108]);
        assert_eq!(&second.as_slice()[8..], &[0, 0, 0, 0]);

        assert!(matches!(
            worker.get_tile(2),
            Err(AlignError::InvalidTileIndex { index: 2, len: 2 })
        ));
        Ok(())
    }

    #[test]
    fn parallel_tiles() -> Result<(), AlignError> {
        let view = view(&[[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]])?;
        let sums = std::sync::Mutex::new(vec![0u64; 3]);
        view.par_for_each_tile(|i, tile| {
            let sum = tile.as_slice().iter().map(|&v| v as u64).sum();
            if let Ok(mut sums) = sums.lock() {
                sums[i] = sum;
            }
            Ok::<(), AlignError>(())
        })?;

        let sums = sums.into_inner().unwrap_or_default();
        assert_eq!(sums[0], (1..=12).sum::<u64>());
        assert!(sums[1] < sums[0] + 1200);
        assert!(sums[2] > 0);
        Ok(())
    }

    #[test]
    fn length_mismatch() {
        let source = InMemoryImageSource::new();
        let loader = Arc::new(ImageLoader::new(Arc::new(source), &CacheConfig::default()));
        let res = AlignedVolumeView::new::<TranslationModel2d>(
            loader,
            vec![PathBuf::from("a.tif")],
            &[],
            [4, 3].into(),
        );
        assert!(matches!(res, Err(AlignError::LengthMismatch { .. })));
    }
}
