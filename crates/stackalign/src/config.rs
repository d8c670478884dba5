use std::path::Path;

use serde::{Deserialize, Serialize};
use stackalign_image::ImageSize;
use stackalign_imgproc::blockmatching::BlockMatchingParams;
use stackalign_imgproc::features::SiftParams;
use stackalign_models::ransac::RansacParams;
use stackalign_models::tile::OptimizerParams;

use crate::error::ConfigError;

/// Parameters of the dense block matching search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockMatchingConfig {
    /// Scale at which images are matched, in `(0, 1]`.
    pub scale: f64,
    /// Number of mesh points per row and column.
    pub mesh_resolution: usize,
    /// Minimal correlation coefficient of a match.
    pub min_r: f32,
    /// Maximal ratio of the second best over the best correlation.
    pub rod: f32,
    /// Maximal ratio of principal curvatures at the correlation peak.
    pub max_curvature: f32,
    /// Search radius in full resolution pixels.
    pub search_radius: usize,
    /// Block radius in full resolution pixels.
    pub block_radius: usize,
}

impl Default for BlockMatchingConfig {
    fn default() -> Self {
        Self {
            scale: 0.1,
            mesh_resolution: 10,
            min_r: 0.1,
            rod: 0.9,
            max_curvature: 1000.0,
            search_radius: 100,
            block_radius: 200,
        }
    }
}

impl BlockMatchingConfig {
    /// The block matching parameters.
    pub fn params(&self) -> BlockMatchingParams {
        BlockMatchingParams {
            scale: self.scale,
            block_radius: self.block_radius,
            search_radius: self.search_radius,
            min_r: self.min_r,
            rod: self.rod,
            max_curvature: self.max_curvature,
        }
    }
}

/// Parameters of the sparse feature fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftConfig {
    /// Number of descriptor cells per row and column.
    pub fd_size: usize,
    /// Number of orientation bins per descriptor cell.
    pub fd_bins: usize,
    /// Largest octave size in pixels.
    pub max_octave_size: usize,
    /// Smallest octave size in pixels.
    pub min_octave_size: usize,
    /// Scale steps per octave.
    pub steps: usize,
    /// Blur of the first scale of each octave.
    pub initial_sigma: f32,
    /// Ratio of distances between the best and second best descriptor match.
    pub rod: f32,
    /// Maximal ratio between the scales of matched features.
    pub max_scale_ratio: f64,
    /// Maximal image distance of matched features in pixels, unbounded if absent.
    pub max_distance: Option<f64>,
    /// Consensus filter of the feature matches.
    pub ransac: RansacParams,
}

impl Default for SiftConfig {
    fn default() -> Self {
        Self {
            fd_size: 8,
            fd_bins: 8,
            max_octave_size: 1024,
            min_octave_size: 128,
            steps: 3,
            initial_sigma: 1.6,
            rod: 0.92,
            max_scale_ratio: 1.5,
            max_distance: None,
            ransac: RansacParams::default(),
        }
    }
}

impl SiftConfig {
    /// The feature extraction parameters.
    pub fn params(&self) -> SiftParams {
        SiftParams {
            fd_size: self.fd_size,
            fd_bins: self.fd_bins,
            max_octave_size: self.max_octave_size,
            min_octave_size: self.min_octave_size,
            steps: self.steps,
            initial_sigma: self.initial_sigma,
        }
    }
}

/// Parameters of the constraint graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileGraphConfig {
    /// Every section is connected to this many following sections.
    pub n_adjacent: usize,
}

impl Default for TileGraphConfig {
    fn default() -> Self {
        Self { n_adjacent: 3 }
    }
}

/// Capacity of the image caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Decoded full resolution images.
    pub images: usize,
    /// Downsampled, contrast normalized images.
    pub downsampled: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            images: 128,
            downsampled: 64,
        }
    }
}

/// Configuration of a section series alignment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignConfig {
    /// Size of every section, read from the first image if absent.
    pub dimensions: Option<ImageSize>,
    /// Dense correspondence search.
    pub block_matching: BlockMatchingConfig,
    /// Sparse correspondence fallback.
    pub sift: SiftConfig,
    /// Constraint graph.
    pub tiles: TileGraphConfig,
    /// Global optimizer.
    pub optimizer: OptimizerParams,
    /// Image caches.
    pub cache: CacheConfig,
    /// Size of the extraction worker pool, all cores if absent.
    pub num_threads: Option<usize>,
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParameter {
        field,
        message: message.into(),
    }
}

impl AlignConfig {
    /// Read a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every parameter against its domain.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bm = &self.block_matching;
        if !(bm.scale > 0.0 && bm.scale <= 1.0) {
            return Err(invalid("block_matching.scale", "must be in (0, 1]"));
        }
        if bm.mesh_resolution == 0 {
            return Err(invalid("block_matching.mesh_resolution", "must be positive"));
        }
        if !(0.0..=1.0).contains(&bm.min_r) {
            return Err(invalid("block_matching.min_r", "must be in [0, 1]"));
        }
        if !(bm.rod > 0.0 && bm.rod <= 1.0) {
            return Err(invalid("block_matching.rod", "must be in (0, 1]"));
        }
        if !(bm.max_curvature > 0.0) {
            return Err(invalid("block_matching.max_curvature", "must be positive"));
        }
        if bm.search_radius == 0 || bm.block_radius == 0 {
            return Err(invalid("block_matching.search_radius", "radii must be positive"));
        }

        let sift = &self.sift;
        if sift.fd_size == 0 || sift.fd_bins == 0 || sift.steps == 0 {
            return Err(invalid("sift.fd_size", "fd_size, fd_bins and steps must be positive"));
        }
        if sift.min_octave_size == 0 || sift.min_octave_size > sift.max_octave_size {
            return Err(invalid(
                "sift.min_octave_size",
                "must be positive and at most max_octave_size",
            ));
        }
        if !(sift.initial_sigma > 0.5) {
            return Err(invalid("sift.initial_sigma", "must be larger than 0.5"));
        }
        if !(sift.rod > 0.0 && sift.rod <= 1.0) {
            return Err(invalid("sift.rod", "must be in (0, 1]"));
        }
        if !(sift.max_scale_ratio >= 1.0) {
            return Err(invalid("sift.max_scale_ratio", "must be at least 1"));
        }
        if sift.max_distance.is_some_and(|d| !(d > 0.0)) {
            return Err(invalid("sift.max_distance", "must be positive"));
        }
        if !(sift.ransac.max_epsilon > 0.0) || !(sift.ransac.max_trust > 0.0) {
            return Err(invalid("sift.ransac", "max_epsilon and max_trust must be positive"));
        }

        if self.tiles.n_adjacent == 0 {
            return Err(invalid("tiles.n_adjacent", "must be at least 1"));
        }

        let opt = &self.optimizer;
        if !(opt.damp > 0.0 && opt.damp <= 1.0) {
            return Err(invalid("optimizer.damp", "must be in (0, 1]"));
        }
        if opt.max_iterations == 0 {
            return Err(invalid("optimizer.max_iterations", "must be positive"));
        }
        if !(opt.max_allowed_error >= 0.0) {
            return Err(invalid("optimizer.max_allowed_error", "must not be negative"));
        }

        if self.num_threads == Some(0) {
            return Err(invalid("num_threads", "must be positive"));
        }
        if self.dimensions.is_some_and(|d| d.area() == 0) {
            return Err(invalid("dimensions", "must not be empty"));
        }
        Ok(())
    }

    /// Stable identity of the parameters that determine extracted correspondences.
    ///
    /// A 64-bit FNV-1a hash of the canonical JSON of the block matching and
    /// feature parameters, hex encoded.
    pub fn fingerprint(&self) -> Result<String, ConfigError> {
        let canonical = serde_json::to_vec(&(&self.block_matching, &self.sift))?;
        Ok(format!("{:016x}", fnv1a(&canonical)))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    bytes
        .iter()
        .fold(OFFSET, |h, &b| (h ^ b as u64).wrapping_mul(PRIME))
}
