use stackalign_image::{Image, ImageError};

use super::{kernels, separable_filter};

/// Blur an image using a gaussian blur filter
///
/// The kernel size is derived from `sigma` so that it spans three standard
/// deviations on each side.
///
/// # Arguments
///
/// * `src` - The source image.
/// * `dst` - The destination image.
/// * `sigma` - The sigma of the gaussian kernel.
///
/// PRECONDITION: `src` and `dst` must have the same shape.
pub fn gaussian_blur(src: &Image<f32>, dst: &mut Image<f32>, sigma: f32) -> Result<(), ImageError> {
    if !(sigma > 0.0) {
        return Err(ImageError::InvalidArgument(format!(
            "gaussian sigma must be positive, got {sigma}"
        )));
    }
    let kernel = kernels::gaussian_kernel_1d(kernels::gaussian_kernel_size(sigma), sigma);
    separable_filter(src, dst, &kernel, &kernel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaussian_blur_preserves_constant() -> Result<(), ImageError> {
        let src = Image::from_size_val([8, 5].into(), 2.5)?;
        let mut dst = Image::from_size_val(src.size(), 0.0)?;
        gaussian_blur(&src, &mut dst, 1.2)?;
        for v in dst.as_slice() {
            assert!((v - 2.5).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn test_gaussian_blur_spreads_impulse() -> Result<(), ImageError> {
        let mut src = Image::from_size_val([9, 9].into(), 0.0)?;
        src.set(4, 4, 1.0);
        let mut dst = Image::from_size_val(src.size(), 0.0)?;
        gaussian_blur(&src, &mut dst, 1.0)?;
        let sum: f32 = dst.as_slice().iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        assert!(dst.get(4, 4) > dst.get(5, 4));
        assert_eq!(dst.get(3, 4), dst.get(5, 4));
        Ok(())
    }

    #[test]
    fn test_gaussian_blur_invalid_sigma() -> Result<(), ImageError> {
        let src = Image::from_size_val([2, 2].into(), 0.0)?;
        let mut dst = src.clone();
        assert!(gaussian_blur(&src, &mut dst, 0.0).is_err());
        Ok(())
    }
}
