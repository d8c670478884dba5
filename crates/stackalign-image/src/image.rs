use serde::{Deserialize, Serialize};

use crate::error::ImageError;

/// Image size in pixels
///
/// A struct to represent the size of an image in pixels.
///
/// # Examples
///
/// ```
/// use stackalign_image::ImageSize;
///
/// let image_size = ImageSize {
///   width: 10,
///   height: 20,
/// };
///
/// assert_eq!(image_size.width, 10);
/// assert_eq!(image_size.height, 20);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    /// Width of the image in pixels
    pub width: usize,
    /// Height of the image in pixels
    pub height: usize,
}

impl ImageSize {
    /// Number of pixels covered by the size.
    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<[usize; 2]> for ImageSize {
    fn from(size: [usize; 2]) -> Self {
        ImageSize {
            width: size[0],
            height: size[1],
        }
    }
}

/// Trait for image data types.
///
/// Send and Sync is required for the rayon based operations.
pub trait ImageDtype: Copy + Default + Into<f32> + Send + Sync + 'static {
    /// Convert a f32 value to the image data type.
    fn from_f32(x: f32) -> Self;
}

impl ImageDtype for f32 {
    fn from_f32(x: f32) -> Self {
        x
    }
}

impl ImageDtype for u8 {
    fn from_f32(x: f32) -> Self {
        x.round().clamp(0.0, 255.0) as u8
    }
}

impl ImageDtype for u16 {
    fn from_f32(x: f32) -> Self {
        x.round().clamp(0.0, u16::MAX as f32) as u16
    }
}

/// Represents a single channel image with pixel data in row-major order.
#[derive(Clone, Debug, PartialEq)]
pub struct Image<T> {
    size: ImageSize,
    data: Vec<T>,
}

impl<T> Image<T> {
    /// Create a new image from pixel data.
    ///
    /// # Arguments
    ///
    /// * `size` - The size of the image in pixels.
    /// * `data` - The pixel data of the image, row by row.
    ///
    /// # Errors
    ///
    /// If the length of the pixel data does not match the image size, an error is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use stackalign_image::{Image, ImageSize};
    ///
    /// let image = Image::<u16>::new(
    ///     ImageSize {
    ///         width: 10,
    ///         height: 20,
    ///     },
    ///     vec![0u16; 10 * 20],
    /// )
    /// .unwrap();
    ///
    /// assert_eq!(image.width(), 10);
    /// assert_eq!(image.height(), 20);
    /// ```
    pub fn new(size: ImageSize, data: Vec<T>) -> Result<Self, ImageError> {
        if data.len() != size.area() {
            return Err(ImageError::InvalidDataLength(data.len(), size.area()));
        }
        Ok(Self { size, data })
    }

    /// Create a new image with the given size filled with `val`.
    pub fn from_size_val(size: ImageSize, val: T) -> Result<Self, ImageError>
    where
        T: Clone,
    {
        Self::new(size, vec![val; size.area()])
    }

    /// The size of the image in pixels.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// The width of the image in pixels.
    pub fn width(&self) -> usize {
        self.size.width
    }

    /// The height of the image in pixels.
    pub fn height(&self) -> usize {
        self.size.height
    }

    /// The pixel data as a slice.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// The pixel data as a mutable slice.
    pub fn as_slice_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Consume the image and return its pixel data.
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Get a reference to the pixel at `(x, y)`, or `None` when out of bounds.
    pub fn get(&self, x: usize, y: usize) -> Option<&T> {
        if x < self.size.width && y < self.size.height {
            self.data.get(y * self.size.width + x)
        } else {
            None
        }
    }

    /// Get a pixel at signed coordinates, or `None` when out of bounds.
    pub fn get_signed(&self, x: isize, y: isize) -> Option<&T> {
        if x < 0 || y < 0 {
            return None;
        }
        self.get(x as usize, y as usize)
    }

    /// Set the pixel at `(x, y)`.
    ///
    /// PRECONDITION: `(x, y)` is inside the image.
    pub fn set(&mut self, x: usize, y: usize, val: T) {
        let width = self.size.width;
        self.data[y * width + x] = val;
    }

    /// Iterate over the rows of the image.
    pub fn rows(&self) -> std::slice::ChunksExact<'_, T> {
        self.data.chunks_exact(self.size.width.max(1))
    }
}

impl<T: ImageDtype> Image<T> {
    /// Cast the image to a floating point image.
    pub fn to_f32(&self) -> Image<f32> {
        Image {
            size: self.size,
            data: self.data.iter().map(|&v| v.into()).collect(),
        }
    }

    /// Create an image from a floating point image, rounding and clamping each value.
    pub fn from_f32(src: &Image<f32>) -> Self {
        Image {
            size: src.size,
            data: src.data.iter().map(|&v| T::from_f32(v)).collect(),
        }
    }
}

impl Image<f32> {
    /// Sample the pixel at `(x, y)` clamping the coordinates to the image border.
    pub fn get_clamped(&self, x: isize, y: isize) -> f32 {
        let x = x.clamp(0, self.size.width as isize - 1) as usize;
        let y = y.clamp(0, self.size.height as isize - 1) as usize;
        self.data[y * self.size.width + x]
    }

    /// Minimum and maximum pixel values, or `None` for an empty image.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        let mut iter = self.data.iter().copied().filter(|v| v.is_finite());
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_size() {
        let image = Image::<u16>::from_size_val([4, 3].into(), 7).unwrap();
        assert_eq!(image.width(), 4);
        assert_eq!(image.height(), 3);
        assert_eq!(image.as_slice().len(), 12);
        assert_eq!(image.size().to_string(), "4x3");
    }

    #[test]
    fn image_invalid_length() {
        let res = Image::<u8>::new([2, 2].into(), vec![0; 3]);
        assert_eq!(res, Err(ImageError::InvalidDataLength(3, 4)));
    }

    #[test]
    fn image_get_set() -> Result<(), ImageError> {
        let mut image = Image::<u16>::from_size_val([3, 2].into(), 0)?;
        image.set(2, 1, 42);
        assert_eq!(image.get(2, 1), Some(&42));
        assert_eq!(image.get(3, 1), None);
        assert_eq!(image.get_signed(-1, 0), None);
        assert_eq!(image.as_slice()[5], 42);
        Ok(())
    }

    #[test]
    fn image_cast_roundtrip() -> Result<(), ImageError> {
        let image = Image::<u16>::new([2, 1].into(), vec![3, 65535])?;
        let float = image.to_f32();
        assert_eq!(float.as_slice(), &[3.0, 65535.0]);
        let back = Image::<u16>::from_f32(&float);
        assert_eq!(back, image);

        let clamped = Image::<u16>::from_f32(&Image::new([2, 1].into(), vec![-4.0, 1e9])?);
        assert_eq!(clamped.as_slice(), &[0, 65535]);
        Ok(())
    }

    #[test]
    fn image_clamped_and_min_max() -> Result<(), ImageError> {
        let image = Image::<f32>::new([2, 2].into(), vec![1.0, 2.0, 3.0, -4.0])?;
        assert_eq!(image.get_clamped(-5, 0), 1.0);
        assert_eq!(image.get_clamped(5, 5), -4.0);
        assert_eq!(image.min_max(), Some((-4.0, 3.0)));
        Ok(())
    }
}
