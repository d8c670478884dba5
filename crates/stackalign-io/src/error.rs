use std::path::PathBuf;

/// An error type for the io module.
#[derive(thiserror::Error, Debug)]
pub enum IoError {
    /// Error when the file does not exist.
    #[error("File does not exist: {0}")]
    FileDoesNotExist(PathBuf),

    /// Invalid file extension.
    #[error("File does not have a valid extension: {0}")]
    InvalidFileExtension(PathBuf),

    /// Error to open the file.
    #[error("Failed to manipulate the file. {0}")]
    FileError(#[from] std::io::Error),

    /// Error to decode or encode a TIFF image.
    #[error("Error with TIFF encoding/decoding. {0}")]
    TiffError(#[from] ::tiff::TiffError),

    /// Error to read or write a CSV table.
    #[error("Error with CSV encoding/decoding. {0}")]
    CsvError(#[from] csv::Error),

    /// Error to create the image.
    #[error("Failed to create image. {0}")]
    ImageCreationError(#[from] stackalign_image::ImageError),

    /// The decoded image has a pixel layout other than 8 or 16 bit grayscale.
    #[error("Unsupported pixel type in {0}")]
    UnsupportedPixelType(PathBuf),

    /// A malformed value in a table.
    #[error("Failed to parse {path} at line {line}: {message}")]
    ParseError {
        /// The file being parsed.
        path: PathBuf,
        /// One based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// Rows of a transform table with different widths.
    #[error("Inconsistent matrix width at row {row}: expected {expected}, got {actual}")]
    InconsistentMatrixWidth {
        /// Zero based row index.
        row: usize,
        /// Width of the first row.
        expected: usize,
        /// Width of the offending row.
        actual: usize,
    },

    /// A matrix width that is neither 6 (2D affine) nor 12 (3D affine).
    #[error("Invalid matrix width {0}, expected 6 or 12")]
    InvalidMatrixWidth(usize),

    /// A raw file whose length does not match the configured layout.
    #[error("Raw file {path} has {actual} bytes, expected {expected}")]
    InvalidRawSize {
        /// The file being read.
        path: PathBuf,
        /// Expected number of bytes.
        expected: usize,
        /// Number of bytes found.
        actual: usize,
    },
}
