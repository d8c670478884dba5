use std::{fs, path::Path};

use stackalign_image::{Image, ImageSize};
use tiff::{
    decoder::DecodingResult,
    encoder::{colortype, TiffEncoder},
};

use crate::error::IoError;

/// Read a grayscale TIFF image as a 16-bit image.
///
/// 8-bit images are widened without rescaling.
///
/// # Arguments
///
/// * `file_path` - The path to the TIFF image.
///
/// # Returns
///
/// The 16-bit grayscale image.
pub fn read_image_tiff_mono16(file_path: impl AsRef<Path>) -> Result<Image<u16>, IoError> {
    let file_path = file_path.as_ref();
    if !file_path.exists() {
        return Err(IoError::FileDoesNotExist(file_path.to_path_buf()));
    }

    if file_path.extension().map_or(true, |ext| {
        !ext.eq_ignore_ascii_case("tiff") && !ext.eq_ignore_ascii_case("tif")
    }) {
        return Err(IoError::InvalidFileExtension(file_path.to_path_buf()));
    }

    let tiff_data = fs::File::open(file_path)?;
    let mut decoder = tiff::decoder::Decoder::new(tiff_data)?;

    let (width, height) = decoder.dimensions()?;
    let size = ImageSize {
        width: width as usize,
        height: height as usize,
    };

    let data = match decoder.read_image()? {
        DecodingResult::U16(data) => data,
        DecodingResult::U8(data) => data.into_iter().map(u16::from).collect(),
        _ => return Err(IoError::UnsupportedPixelType(file_path.to_path_buf())),
    };

    if data.len() != size.area() {
        return Err(IoError::UnsupportedPixelType(file_path.to_path_buf()));
    }

    Ok(Image::new(size, data)?)
}

/// Write a 16-bit grayscale TIFF image.
///
/// # Arguments
///
/// * `file_path` - The path to the TIFF image.
/// * `image` - The image to write.
pub fn write_image_tiff_mono16(
    file_path: impl AsRef<Path>,
    image: &Image<u16>,
) -> Result<(), IoError> {
    let file = fs::File::create(file_path)?;

    let mut encoder = TiffEncoder::new(file)?;
    encoder.write_image::<colortype::Gray16>(
        image.width() as u32,
        image.height() as u32,
        image.as_slice(),
    )?;
    Ok(())
}
