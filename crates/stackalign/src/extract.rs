//! Pairwise correspondence extraction.
//!
//! Dense block matching on downsampled images is tried first. When it yields
//! fewer than [`min_dense_matches`] matches, typically because the sections
//! are shifted beyond the search radius, scale-space features are extracted
//! from the full resolution images, matched by descriptor and filtered by a
//! translation model.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use stackalign_imgproc::blockmatching::{match_by_maximal_pmcc, mesh_points};
use stackalign_imgproc::features::{extract_features, filter_feature_matches, match_features};
use stackalign_io::CorrespondenceStore;
use stackalign_models::ransac::filter_ransac;
use stackalign_models::{CorrespondenceSet, MatchMethod, ModelError, PointMatch, TranslationModel2d};

use crate::config::AlignConfig;
use crate::error::{ConfigError, ExtractError};
use crate::loader::ImageLoader;

/// Minimal number of block matches for the dense result to be trusted.
///
/// # Example
///
/// ```
/// use stackalign::extract::min_dense_matches;
///
/// assert_eq!(min_dense_matches(100), 10);
/// assert_eq!(min_dense_matches(400), 40);
/// ```
pub fn min_dense_matches(mesh_points: usize) -> usize {
    20.max(mesh_points / 5) / 2
}

/// Identifier of a section in persisted artifacts, its file name.
pub fn tile_id(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Result of ensuring the correspondences of one pair.
#[derive(Debug)]
pub enum PairOutcome {
    /// Correspondences were extracted and persisted.
    Extracted {
        /// The method that produced them.
        method: MatchMethod,
        /// Number of correspondences.
        matches: usize,
    },
    /// A persisted set with the same fingerprint already existed.
    Skipped,
    /// Extraction failed; the pair has no correspondences.
    Failed(ExtractError),
}

/// Outcome of one pair of a batch.
#[derive(Debug)]
pub struct PairReport {
    /// The source section.
    pub source: PathBuf,
    /// The target section.
    pub target: PathBuf,
    /// What happened.
    pub outcome: PairOutcome,
}

/// Outcomes of a batch of pairs, in input order.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// One report per pair.
    pub pairs: Vec<PairReport>,
}

impl BatchReport {
    /// Number of pairs extracted in this batch.
    pub fn extracted(&self) -> usize {
        self.count(|o| matches!(o, PairOutcome::Extracted { .. }))
    }

    /// Number of pairs found already persisted.
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, PairOutcome::Skipped))
    }

    /// Number of failed pairs.
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, PairOutcome::Failed(_)))
    }

    fn count(&self, f: impl Fn(&PairOutcome) -> bool) -> usize {
        self.pairs.iter().filter(|p| f(&p.outcome)).count()
    }
}

/// Extracts the correspondences between pairs of sections.
pub struct CorrespondenceExtractor {
    loader: Arc<ImageLoader>,
    config: AlignConfig,
    fingerprint: String,
}

impl CorrespondenceExtractor {
    /// Create an extractor, validating the configuration.
    pub fn new(loader: Arc<ImageLoader>, config: AlignConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let fingerprint = config.fingerprint()?;
        Ok(Self {
            loader,
            config,
            fingerprint,
        })
    }

    /// Fingerprint of the extraction parameters.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Extract the correspondences from section `a` (`p1`) to section `b` (`p2`).
    pub fn extract(&self, a: &Path, b: &Path) -> Result<CorrespondenceSet<2>, ExtractError> {
        let bm = &self.config.block_matching;
        let (scaled_a, scaled_b) = rayon::join(
            || self.loader.load_scaled(a, bm.scale),
            || self.loader.load_scaled(b, bm.scale),
        );
        let (scaled_a, scaled_b) = (scaled_a?, scaled_b?);

        let (size_a, size_b) = match self.config.dimensions {
            Some(size) => (size, size),
            None => (self.loader.load(a)?.size(), self.loader.load(b)?.size()),
        };

        let points = mesh_points(size_a, bm.mesh_resolution);
        let dense = match_by_maximal_pmcc(&scaled_a, &scaled_b, size_b, &points, &bm.params());
        let required = min_dense_matches(points.len());

        let (method, matches) = if dense.len() >= required {
            let matches = dense
                .iter()
                .map(|m| PointMatch {
                    p1: m.source,
                    p2: m.target,
                    weight: m.r as f64,
                })
                .collect();
            (MatchMethod::BlockMatching, matches)
        } else {
            log::info!(
                "{} -> {}: {} block matches, fewer than {}, using features",
                a.display(),
                b.display(),
                dense.len(),
                required
            );
            (MatchMethod::Sift, self.extract_sparse(a, b, dense.len())?)
        };

        Ok(CorrespondenceSet {
            source_id: tile_id(a),
            target_id: tile_id(b),
            method,
            fingerprint: self.fingerprint.clone(),
            matches,
        })
    }

    fn extract_sparse(
        &self,
        a: &Path,
        b: &Path,
        dense: usize,
    ) -> Result<Vec<PointMatch<2>>, ExtractError> {
        let sift = &self.config.sift;
        let params = sift.params();

        let (image_a, image_b) = rayon::join(|| self.loader.load(a), || self.loader.load(b));
        let (image_a, image_b) = (image_a?, image_b?);

        let (features_a, features_b) = rayon::join(
            || extract_features(&image_a.to_f32(), &params),
            || extract_features(&image_b.to_f32(), &params),
        );
        let (features_a, features_b) = (features_a?, features_b?);

        let candidates = match_features(&features_a, &features_b, sift.rod);
        let candidates = filter_feature_matches(
            &features_a,
            &features_b,
            &candidates,
            sift.max_scale_ratio,
            sift.max_distance.unwrap_or(f64::INFINITY),
        );
        log::debug!(
            "{} / {} features, {} candidate matches",
            features_a.len(),
            features_b.len(),
            candidates.len()
        );

        let candidates = candidates
            .iter()
            .map(|&(i, j)| PointMatch::new(features_a[i].location, features_b[j].location))
            .collect::<Vec<_>>();

        match filter_ransac::<TranslationModel2d, 2>(&candidates, &sift.ransac) {
            Ok((_, inliers)) => Ok(inliers),
            Err(ModelError::NoConsensus { inliers, .. }) => Err(ExtractError::InsufficientData {
                dense,
                sparse: inliers,
            }),
            Err(ModelError::NotEnoughDataPoints { actual, .. }) => {
                Err(ExtractError::InsufficientData {
                    dense,
                    sparse: actual,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Make sure the correspondences of the pair are persisted.
    ///
    /// A set persisted with the same fingerprint is left untouched.
    pub fn ensure(
        &self,
        a: &Path,
        b: &Path,
        store: &CorrespondenceStore,
    ) -> Result<PairOutcome, ExtractError> {
        if store.exists(&tile_id(a), &tile_id(b), &self.fingerprint) {
            return Ok(PairOutcome::Skipped);
        }

        let set = self.extract(a, b)?;
        store.save(&set)?;
        Ok(PairOutcome::Extracted {
            method: set.method,
            matches: set.len(),
        })
    }

    /// Ensure the correspondences of every pair on `pool`.
    ///
    /// Failures are isolated per pair, logged and reported; they never abort
    /// the other pairs.
    pub fn ensure_correspondences(
        &self,
        pairs: &[(PathBuf, PathBuf)],
        store: &CorrespondenceStore,
        pool: &rayon::ThreadPool,
    ) -> BatchReport {
        let total = pairs.len();
        let done = AtomicUsize::new(0);

        let reports = pool.install(|| {
            pairs
                .par_iter()
                .map(|(a, b)| {
                    let outcome = self.ensure(a, b, store).unwrap_or_else(|e| {
                        log::warn!(
                            "failed to extract correspondences {} -> {}: {}",
                            a.display(),
                            b.display(),
                            e
                        );
                        PairOutcome::Failed(e)
                    });
                    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                    log::info!("Completed {}/{}", n, total);
                    PairReport {
                        source: a.clone(),
                        target: b.clone(),
                        outcome,
                    }
                })
                .collect::<Vec<_>>()
        });

        BatchReport { pairs: reports }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_dense_matches() {
        assert_eq!(min_dense_matches(0), 10);
        assert_eq!(min_dense_matches(25), 10);
        assert_eq!(min_dense_matches(100), 10);
        assert_eq!(min_dense_matches(101), 10);
        assert_eq!(min_dense_matches(110), 11);
        assert_eq!(min_dense_matches(1000), 100);
    }

    #[test]
    fn test_tile_id() {
        assert_eq!(tile_id(Path::new("/data/s0001.tif")), "s0001.tif");
        assert_eq!(tile_id(Path::new("s0001")), "s0001");
        // sections differing only in their extension do not share artifacts
        assert_ne!(tile_id(Path::new("s1.tif")), tile_id(Path::new("s1.png")));
    }
}
