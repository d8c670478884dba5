use stackalign_image::{Image, ImageError, ImageSize};

use crate::filter::gaussian_blur;
use crate::interpolation::bilinear_interpolation;

/// Downsample an image by `scale` after a gaussian pre-filter.
///
/// The source is assumed to carry a blur of `source_sigma` pixels. The image is
/// blurred so that the result, once resampled, carries `target_sigma` pixels of
/// blur at the new resolution:
///
/// ```text
/// sigma = sqrt((target_sigma / scale)^2 - source_sigma^2)
/// ```
///
/// A scale of exactly one returns a copy of the source.
///
/// # Arguments
///
/// * `src` - The source image.
/// * `scale` - The scale factor in `(0, 1]`.
/// * `source_sigma` - The blur already present in the source.
/// * `target_sigma` - The blur wanted in the downsampled image.
///
/// # Returns
///
/// The downsampled image of size `round(size * scale)`, at least one pixel.
pub fn downsample(
    src: &Image<f32>,
    scale: f64,
    source_sigma: f32,
    target_sigma: f32,
) -> Result<Image<f32>, ImageError> {
    if !(scale > 0.0 && scale <= 1.0) {
        return Err(ImageError::InvalidArgument(format!(
            "downsampling scale must be in (0, 1], got {scale}"
        )));
    }

    if src.width() == 0 || src.height() == 0 {
        return Err(ImageError::EmptyImage);
    }

    if scale == 1.0 {
        return Ok(src.clone());
    }

    let s = target_sigma / scale as f32;
    let sigma = (s * s - source_sigma * source_sigma).max(0.0).sqrt();

    let blurred = if sigma > 0.0 {
        let mut blurred = Image::from_size_val(src.size(), 0.0)?;
        gaussian_blur(src, &mut blurred, sigma)?;
        blurred
    } else {
        src.clone()
    };

    let size = ImageSize {
        width: ((src.width() as f64 * scale).round() as usize).max(1),
        height: ((src.height() as f64 * scale).round() as usize).max(1),
    };

    let inv = 1.0 / scale as f32;
    let mut data = Vec::with_capacity(size.area());
    for y in 0..size.height {
        let v = (y as f32 + 0.5) * inv - 0.5;
        for x in 0..size.width {
            let u = (x as f32 + 0.5) * inv - 0.5;
            data.push(bilinear_interpolation(&blurred, u, v));
        }
    }

    Image::new(size, data)
}

/// Halve an image by taking every second pixel.
///
/// Used to start a new octave from an image that already carries twice the
/// base blur.
pub fn halve(src: &Image<f32>) -> Result<Image<f32>, ImageError> {
    let size = ImageSize {
        width: src.width() / 2,
        height: src.height() / 2,
    };
    if size.width == 0 || size.height == 0 {
        return Err(ImageError::EmptyImage);
    }

    let mut data = Vec::with_capacity(size.area());
    for y in 0..size.height {
        let row = &src.as_slice()[2 * y * src.width()..(2 * y + 1) * src.width()];
        data.extend(row.iter().step_by(2).take(size.width));
    }

    Image::new(size, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_downsample_identity() -> Result<(), ImageError> {
        let src = Image::new([2, 2].into(), vec![1.0, 2.0, 3.0, 4.0])?;
        let dst = downsample(&src, 1.0, 0.5, 1.6)?;
        assert_eq!(dst, src);
        Ok(())
    }

    #[test]
    fn test_downsample_size_and_mean() -> Result<(), ImageError> {
        let src = Image::from_size_val([40, 20].into(), 0.25)?;
        let dst = downsample(&src, 0.25, 0.5, 1.6)?;
        assert_eq!(dst.size(), [10, 5].into());
        for v in dst.as_slice() {
            assert_relative_eq!(*v, 0.25, epsilon = 1e-5);
        }
        Ok(())
    }

    #[test]
    fn test_downsample_invalid_scale() -> Result<(), ImageError> {
        let src = Image::from_size_val([4, 4].into(), 0.0)?;
        assert!(downsample(&src, 0.0, 0.5, 1.6).is_err());
        assert!(downsample(&src, 1.5, 0.5, 1.6).is_err());
        Ok(())
    }

    #[test]
    fn test_halve() -> Result<(), ImageError> {
        let src = Image::new([4, 2].into(), (0..8).map(|v| v as f32).collect())?;
        let dst = halve(&src)?;
        assert_eq!(dst.size(), [2, 1].into());
        assert_eq!(dst.as_slice(), &[0.0, 2.0]);
        Ok(())
    }
}
