use rayon::prelude::*;
use stackalign_image::{Image, ImageError};

/// Apply a separable filter to an image.
///
/// The horizontal kernel is applied first, then the vertical one. Borders are
/// handled by replicating the edge pixels.
///
/// # Arguments
///
/// * `src` - The source image.
/// * `dst` - The destination image.
/// * `kernel_x` - The horizontal kernel, of odd length.
/// * `kernel_y` - The vertical kernel, of odd length.
///
/// PRECONDITION: `src` and `dst` must have the same shape.
pub fn separable_filter(
    src: &Image<f32>,
    dst: &mut Image<f32>,
    kernel_x: &[f32],
    kernel_y: &[f32],
) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.width(),
            src.height(),
            dst.width(),
            dst.height(),
        ));
    }

    if kernel_x.len() % 2 == 0 || kernel_y.len() % 2 == 0 {
        return Err(ImageError::InvalidArgument(format!(
            "kernel sizes must be odd, got {}x{}",
            kernel_x.len(),
            kernel_y.len()
        )));
    }

    let cols = src.width();
    let rows = src.height();
    if cols == 0 || rows == 0 {
        return Ok(());
    }

    let half_x = (kernel_x.len() / 2) as isize;
    let half_y = (kernel_y.len() / 2) as isize;
    let last_col = cols as isize - 1;
    let last_row = rows as isize - 1;

    // horizontal pass
    let mut temp = vec![0.0f32; cols * rows];
    temp.par_chunks_exact_mut(cols)
        .zip(src.as_slice().par_chunks_exact(cols))
        .for_each(|(temp_row, src_row)| {
            for (c, out) in temp_row.iter_mut().enumerate() {
                let mut acc = 0.0;
                for (k, &w) in kernel_x.iter().enumerate() {
                    let x = (c as isize + k as isize - half_x).clamp(0, last_col) as usize;
                    acc += src_row[x] * w;
                }
                *out = acc;
            }
        });

    // vertical pass
    dst.as_slice_mut()
        .par_chunks_exact_mut(cols)
        .enumerate()
        .for_each(|(r, dst_row)| {
            for (c, out) in dst_row.iter_mut().enumerate() {
                let mut acc = 0.0;
                for (k, &w) in kernel_y.iter().enumerate() {
                    let y = (r as isize + k as isize - half_y).clamp(0, last_row) as usize;
                    acc += temp[y * cols + c] * w;
                }
                *out = acc;
            }
        });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackalign_image::ImageSize;

    #[test]
    fn test_separable_filter_identity() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 3,
            height: 2,
        };
        let src = Image::new(size, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])?;
        let mut dst = Image::from_size_val(size, 0.0)?;
        separable_filter(&src, &mut dst, &[0.0, 1.0, 0.0], &[1.0])?;
        assert_eq!(dst.as_slice(), src.as_slice());
        Ok(())
    }

    #[test]
    fn test_separable_filter_box() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 3,
            height: 1,
        };
        let src = Image::new(size, vec![0.0, 3.0, 6.0])?;
        let mut dst = Image::from_size_val(size, 0.0)?;
        let third = 1.0 / 3.0;
        separable_filter(&src, &mut dst, &[third, third, third], &[1.0])?;
        // replicated borders: [0, 0, 3], [0, 3, 6], [3, 6, 6]
        let expected = [1.0, 3.0, 5.0];
        for (a, b) in dst.as_slice().iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn test_separable_filter_size_mismatch() -> Result<(), ImageError> {
        let src = Image::from_size_val([3, 3].into(), 0.0)?;
        let mut dst = Image::from_size_val([2, 3].into(), 0.0)?;
        let res = separable_filter(&src, &mut dst, &[1.0], &[1.0]);
        assert!(matches!(res, Err(ImageError::InvalidImageSize(3, 3, 2, 3))));
        Ok(())
    }
}
