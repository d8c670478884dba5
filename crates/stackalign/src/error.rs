use std::path::PathBuf;

use stackalign_image::ImageError;
use stackalign_io::IoError;
use stackalign_models::{ModelError, OptimizeError};

/// An error type for loading and validating the configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Error to read the configuration file.
    #[error("Failed to read the configuration. {0}")]
    FileError(#[from] std::io::Error),

    /// Error to parse or serialize the configuration.
    #[error("Failed to parse the configuration. {0}")]
    JsonError(#[from] serde_json::Error),

    /// A parameter outside its domain.
    #[error("Invalid parameter {field}: {message}")]
    InvalidParameter {
        /// Dotted name of the parameter.
        field: &'static str,
        /// Description of the valid domain.
        message: String,
    },
}

/// An error type for extracting the correspondences of one image pair.
#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    /// Neither block matching nor the sparse fallback found enough matches.
    #[error("Insufficient data: {dense} block matches, {sparse} feature inliers")]
    InsufficientData {
        /// Number of block matches.
        dense: usize,
        /// Number of feature matches surviving the model fit.
        sparse: usize,
    },

    /// Error to load an image or persist the result.
    #[error(transparent)]
    Io(#[from] IoError),

    /// Error while processing an image.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Error while fitting a model.
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// An error type for the alignment pipelines.
#[derive(thiserror::Error, Debug)]
pub enum AlignError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Error to read or write files.
    #[error(transparent)]
    Io(#[from] IoError),

    /// Error while processing an image.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Error while fitting or inverting a model.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Error of the global optimizer.
    #[error(transparent)]
    Optimize(#[from] OptimizeError),

    /// Error to build the worker pool.
    #[error("Failed to build the thread pool. {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// No input images were found.
    #[error("No images found in {0}")]
    NoImages(PathBuf),

    /// A precomputed artifact required by this stage is missing.
    #[error("Missing artifact: {0}")]
    MissingArtifact(PathBuf),

    /// A time point folder without exactly four cameras.
    #[error("Time point {dir} has {found} cameras instead of 4")]
    InvalidTimePoint {
        /// The time point folder.
        dir: PathBuf,
        /// Number of distinct cameras found.
        found: usize,
    },

    /// Inputs of different lengths that must correspond one to one.
    #[error("Length mismatch: {left} {left_name} vs {right} {right_name}")]
    LengthMismatch {
        /// Name of the first input.
        left_name: &'static str,
        /// Length of the first input.
        left: usize,
        /// Name of the second input.
        right_name: &'static str,
        /// Length of the second input.
        right: usize,
    },

    /// A tile index out of range.
    #[error("Tile index {index} out of range for {len} tiles")]
    InvalidTileIndex {
        /// The requested index.
        index: usize,
        /// Number of tiles.
        len: usize,
    },

    /// Failure reported by an external collaborator.
    #[error("{stage} failed: {message}")]
    Collaborator {
        /// The stage that invoked the collaborator.
        stage: &'static str,
        /// The collaborator's message.
        message: String,
    },
}
