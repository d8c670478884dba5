/// An error type for fitting transformation models.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ModelError {
    /// Too few correspondences to determine the model.
    #[error("Not enough data points: required {required}, got {actual}")]
    NotEnoughDataPoints {
        /// Minimal number of matches of the model.
        required: usize,
        /// Number of matches given.
        actual: usize,
    },

    /// The correspondences do not determine the model, e.g. collinear points.
    #[error("Ill defined data points")]
    IllDefinedDataPoints,

    /// A flat matrix of unexpected length.
    #[error("Invalid matrix length: expected {expected}, got {actual}")]
    InvalidMatrixLength {
        /// Expected number of entries.
        expected: usize,
        /// Number of entries given.
        actual: usize,
    },

    /// The model has no inverse.
    #[error("Model is not invertible")]
    NotInvertible,

    /// Consensus filtering kept too few inliers.
    #[error("No consensus: {inliers} inliers out of {candidates} candidates")]
    NoConsensus {
        /// Number of inliers of the best hypothesis.
        inliers: usize,
        /// Number of candidate matches.
        candidates: usize,
    },
}

/// An error type for the global tile optimizer.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum OptimizeError {
    /// The configuration has no tiles.
    #[error("Cannot optimize an empty tile configuration")]
    NoTiles,

    /// The damping factor is outside `(0, 1]`.
    #[error("Invalid damp {0}, expected a value in (0, 1]")]
    InvalidDamp(f64),

    /// A tile index out of range.
    #[error("Tile index {index} out of range for {len} tiles")]
    InvalidTileIndex {
        /// The offending index.
        index: usize,
        /// Number of tiles.
        len: usize,
    },
}
