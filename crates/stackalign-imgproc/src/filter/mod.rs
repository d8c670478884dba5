mod ops;
pub use ops::*;

/// kernels for filtering operations.
pub mod kernels;

mod separable_filter;
pub use separable_filter::*;
