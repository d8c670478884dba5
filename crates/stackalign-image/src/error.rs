/// An error type for the image module.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ImageError {
    /// Error when the data length does not match the image size.
    #[error("Data length ({0}) does not match the image size ({1})")]
    InvalidDataLength(usize, usize),

    /// Error when the image size does not match the expected one.
    #[error("Invalid image size: expected {0}x{1}, got {2}x{3}")]
    InvalidImageSize(usize, usize, usize, usize),

    /// Error when the image has no pixels.
    #[error("Image has zero width or height")]
    EmptyImage,

    /// Error when an operation receives an argument out of its domain.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
