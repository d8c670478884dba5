//! Scale-space feature extraction and matching.
//!
//! Used as a sparse fallback when dense block matching cannot establish
//! enough correspondences between two images:
//!
//! - Difference of gaussian extrema localized to sub-pixel accuracy
//! - Orientation normalized gradient histogram descriptors
//! - Nearest neighbour matching with Lowe's ratio test

mod sift;
pub use sift::*;

mod r#match;
pub use r#match::*;
