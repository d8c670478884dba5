#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// error types for model fitting and optimization.
pub mod error;
pub use error::{ModelError, OptimizeError};

mod point_match;
pub use point_match::*;

/// transformation models between point sets.
pub mod models;
pub use models::{
    AffineModel2d, AffineModel3d, Model, TranslationModel2d, TranslationModel3d,
};

/// robust consensus filtering of correspondences.
pub mod ransac;

mod statistic;
pub use statistic::ErrorStatistic;

/// global optimization of tile transforms over a correspondence graph.
pub mod tile;
