#![deny(missing_docs)]
//! Image types for serial section registration

/// image representation for registration purposes.
pub mod image;

/// Error types for the image module.
pub mod error;

pub use crate::error::ImageError;
pub use crate::image::{Image, ImageDtype, ImageSize};
