use stackalign_image::Image;

/// Stretch the image contrast in place so that its values span `[0, 1]`.
///
/// Images with a single value, or without finite values, are set to zero.
///
/// # Example
///
/// ```
/// use stackalign_image::Image;
/// use stackalign_imgproc::normalize::normalize_contrast;
///
/// let mut image = Image::new([3, 1].into(), vec![10.0, 20.0, 30.0]).unwrap();
/// normalize_contrast(&mut image);
/// assert_eq!(image.as_slice(), &[0.0, 0.5, 1.0]);
/// ```
pub fn normalize_contrast(image: &mut Image<f32>) {
    let Some((lo, hi)) = image.min_max() else {
        image.as_slice_mut().iter_mut().for_each(|v| *v = 0.0);
        return;
    };

    let range = hi - lo;
    if range <= f32::EPSILON {
        image.as_slice_mut().iter_mut().for_each(|v| *v = 0.0);
        return;
    }

    image
        .as_slice_mut()
        .iter_mut()
        .for_each(|v| *v = ((*v - lo) / range).clamp(0.0, 1.0));
}
