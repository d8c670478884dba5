use stackalign_image::Image;

/// Sample an image at a sub-pixel location with bilinear interpolation.
///
/// Coordinates outside the image are clamped to the border pixels.
///
/// # Arguments
///
/// * `image` - The image to sample.
/// * `u` - The horizontal coordinate.
/// * `v` - The vertical coordinate.
pub fn bilinear_interpolation(image: &Image<f32>, u: f32, v: f32) -> f32 {
    let x0 = u.floor();
    let y0 = v.floor();
    let fx = u - x0;
    let fy = v - y0;
    let (x0, y0) = (x0 as isize, y0 as isize);

    let p00 = image.get_clamped(x0, y0);
    let p10 = image.get_clamped(x0 + 1, y0);
    let p01 = image.get_clamped(x0, y0 + 1);
    let p11 = image.get_clamped(x0 + 1, y0 + 1);

    let top = p00 + (p10 - p00) * fx;
    let bottom = p01 + (p11 - p01) * fx;
    top + (bottom - top) * fy
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use stackalign_image::ImageError;

    #[test]
    fn test_bilinear_interpolation() -> Result<(), ImageError> {
        let image = Image::new([2, 2].into(), vec![0.0, 1.0, 2.0, 3.0])?;
        assert_relative_eq!(bilinear_interpolation(&image, 0.0, 0.0), 0.0);
        assert_relative_eq!(bilinear_interpolation(&image, 0.5, 0.0), 0.5);
        assert_relative_eq!(bilinear_interpolation(&image, 0.5, 0.5), 1.5);
        assert_relative_eq!(bilinear_interpolation(&image, 1.0, 1.0), 3.0);
        // clamped outside
        assert_relative_eq!(bilinear_interpolation(&image, 4.0, -3.0), 1.0);
        Ok(())
    }
}
