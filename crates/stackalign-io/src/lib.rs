#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// bounded least recently used cache.
pub mod cache;

/// persistence of correspondence sets.
pub mod correspondence_store;

/// Error types for the io module.
pub mod error;

/// image sources the pipeline loads sections from.
pub mod source;

/// TIFF image encoding and decoding.
pub mod tiff;

/// persistence of per tile transform matrices.
pub mod transform_store;

pub use cache::SoftCache;
pub use correspondence_store::CorrespondenceStore;
pub use error::IoError;
pub use source::{ImageSource, InMemoryImageSource, RawImageSource, TiffImageSource};
pub use transform_store::TransformStore;
