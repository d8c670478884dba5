#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// resumable alignment of a section series.
pub mod align;

/// typed configuration of the pipelines.
pub mod config;

/// Error types for the alignment pipelines.
pub mod error;

/// pairwise correspondence extraction.
pub mod extract;

/// constraint graph over the sections.
pub mod graph;

/// cached image loading.
pub mod loader;

/// multi-camera time point registration and fusion.
pub mod timepoints;

/// lazy access to the aligned stack.
pub mod view;

pub use align::{align_sections, discover_sections};
pub use config::AlignConfig;
pub use error::{AlignError, ConfigError, ExtractError};
pub use extract::CorrespondenceExtractor;
pub use loader::ImageLoader;
pub use view::{AlignedVolumeView, TileWorker};

pub use stackalign_image as image;
pub use stackalign_imgproc as imgproc;
pub use stackalign_io as io;
pub use stackalign_models as models;
