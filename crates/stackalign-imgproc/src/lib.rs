#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// dense correspondence search by block matching.
pub mod blockmatching;

/// scale-space feature detection, description and matching.
pub mod features;

/// image filtering module.
pub mod filter;

/// utilities for interpolation.
pub mod interpolation;

/// operations to normalize images.
pub mod normalize;

/// utility functions for resizing images.
pub mod resize;
