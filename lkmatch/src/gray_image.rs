use crate::error::{MatchError, Result};

/// A single-channel image with `f32` pixels stored row by row.
///
/// Both the search image and the reference patch handed to the matcher are
/// `GrayImage`s. The pixel at `(x, y)` lives at index `y * width + x`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GrayImage {
    /// Pixel values in row-major order, `width * height` entries.
    pixels: Vec<f32>,
    /// The width (in pixels) of the image.
    width: usize,
    /// The height (in pixels) of the image.
    height: usize,
}

impl GrayImage {
    /// Creates a `width` × `height` image with every pixel set to `value`.
    pub fn new(width: usize, height: usize, value: f32) -> Self {
        GrayImage {
            pixels: vec![value; width * height],
            width,
            height,
        }
    }

    /// Wraps an existing row-major pixel buffer.
    ///
    /// # Errors
    /// Returns [`MatchError::SizeMismatch`] if `pixels.len() != width * height`.
    ///
    /// # Examples
    /// ```
    /// # use lkmatch::gray_image::GrayImage;
    /// let img = GrayImage::from_vec(2, 2, vec![0.0, 1.0, 2.0, 3.0]).unwrap();
    /// assert_eq!(img.get(1, 1), Some(3.0));
    /// assert!(GrayImage::from_vec(3, 2, vec![0.0; 5]).is_err());
    /// ```
    pub fn from_vec(width: usize, height: usize, pixels: Vec<f32>) -> Result<Self> {
        let expected = width.checked_mul(height).ok_or(MatchError::SizeMismatch {
            expected: usize::MAX,
            actual: pixels.len(),
        })?;
        if pixels.len() != expected {
            return Err(MatchError::SizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(GrayImage {
            pixels,
            width,
            height,
        })
    }

    /// Builds an image by evaluating `f(x, y)` for every pixel.
    pub fn from_fn<F>(width: usize, height: usize, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> f32,
    {
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        GrayImage {
            pixels,
            width,
            height,
        }
    }

    /// Converts RGBA pixel data (4 bytes per pixel) to luminance using the
    /// Rec. 601 weights. Alpha is ignored.
    ///
    /// # Errors
    /// Returns [`MatchError::SizeMismatch`] if `rgba.len() != width * height * 4`.
    pub fn from_rgba(width: usize, height: usize, rgba: &[u8]) -> Result<Self> {
        let expected = width * height * 4;
        if rgba.len() != expected {
            return Err(MatchError::SizeMismatch {
                expected,
                actual: rgba.len(),
            });
        }
        let pixels = rgba
            .chunks_exact(4)
            .map(|px| 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32)
            .collect();
        Ok(GrayImage {
            pixels,
            width,
            height,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    /// Returns the pixel at `(x, y)`, or `None` if it lies outside the image.
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.pixels[y * self.width + x])
    }

    /// Overwrites the pixel at `(x, y)`. Out-of-range coordinates are ignored.
    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        if x < self.width && y < self.height {
            self.pixels[y * self.width + x] = value;
        }
    }

    /// Copies the `width` × `height` region whose top-left corner is `(x, y)`.
    ///
    /// This is how a reference patch is usually cut from a search image.
    ///
    /// # Errors
    /// Returns [`MatchError::RegionOutOfBounds`] if the region is not fully
    /// contained in the image.
    ///
    /// # Examples
    /// ```
    /// # use lkmatch::gray_image::GrayImage;
    /// let img = GrayImage::from_fn(4, 3, |x, y| (10 * y + x) as f32);
    /// let patch = img.crop(1, 1, 2, 2).unwrap();
    /// assert_eq!(patch.pixels(), &[11.0, 12.0, 21.0, 22.0]);
    /// assert!(img.crop(3, 0, 2, 1).is_err());
    /// ```
    pub fn crop(&self, x: usize, y: usize, width: usize, height: usize) -> Result<GrayImage> {
        let fits = x
            .checked_add(width)
            .zip(y.checked_add(height))
            .is_some_and(|(x_end, y_end)| x_end <= self.width && y_end <= self.height);
        if !fits {
            return Err(MatchError::RegionOutOfBounds {
                x,
                y,
                width,
                height,
                image_width: self.width,
                image_height: self.height,
            });
        }

        let mut pixels = Vec::with_capacity(width * height);
        for row in y..y + height {
            let start = row * self.width + x;
            pixels.extend_from_slice(&self.pixels[start..start + width]);
        }
        Ok(GrayImage {
            pixels,
            width,
            height,
        })
    }

    /// Returns the smallest and largest pixel values, or `None` for an empty image.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        self.pixels.iter().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }

    /// Produces opaque RGBA bytes, linearly stretching the value range onto
    /// `0..=255`. A flat image maps to mid-gray.
    pub fn to_rgba8(&self) -> Vec<u8> {
        let (lo, hi) = self.value_range().unwrap_or((0.0, 0.0));
        let span = hi - lo;
        let mut out = Vec::with_capacity(self.pixels.len() * 4);
        for &v in &self.pixels {
            let g = if span > 0.0 {
                ((v - lo) / span * 255.0).round().clamp(0.0, 255.0) as u8
            } else {
                128
            };
            out.extend_from_slice(&[g, g, g, 255]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::GrayImage;
    use crate::error::MatchError;

    #[test]
    fn from_rgba_uses_luma_weights() {
        let rgba = [255u8, 0, 0, 255, 0, 255, 0, 0, 0, 0, 255, 255, 10, 10, 10, 255];
        let img = GrayImage::from_rgba(2, 2, &rgba).expect("valid buffer");
        let expected = [0.299 * 255.0, 0.587 * 255.0, 0.114 * 255.0, 10.0];
        for (got, want) in img.pixels().iter().zip(expected) {
            assert!((got - want).abs() < 1e-3, "{got} vs {want}");
        }
        assert!(GrayImage::from_rgba(2, 2, &rgba[..12]).is_err());
    }

    #[test]
    fn crop_reports_region_that_does_not_fit() {
        let img = GrayImage::new(5, 4, 0.0);
        assert!(img.crop(0, 0, 5, 4).is_ok());
        let err = img.crop(2, 2, 3, 3).unwrap_err();
        assert_eq!(
            err,
            MatchError::RegionOutOfBounds {
                x: 2,
                y: 2,
                width: 3,
                height: 3,
                image_width: 5,
                image_height: 4,
            }
        );
        assert!(img.crop(usize::MAX, 0, 2, 1).is_err());
    }

    #[test]
    fn get_and_set_ignore_out_of_range() {
        let mut img = GrayImage::new(2, 2, 1.0);
        img.set(1, 0, 5.0);
        img.set(2, 0, 9.0);
        assert_eq!(img.get(1, 0), Some(5.0));
        assert_eq!(img.get(2, 0), None);
        assert_eq!(img.pixels(), &[1.0, 5.0, 1.0, 1.0]);
    }

    #[test]
    fn to_rgba8_stretches_range() {
        let img = GrayImage::from_vec(3, 1, vec![-1.0, 0.0, 1.0]).expect("valid image");
        let rgba = img.to_rgba8();
        assert_eq!(&rgba[0..4], &[0, 0, 0, 255]);
        assert_eq!(rgba[4], 128);
        assert_eq!(&rgba[8..12], &[255, 255, 255, 255]);

        let flat = GrayImage::new(1, 1, 3.0).to_rgba8();
        assert_eq!(flat, vec![128, 128, 128, 255]);
    }
}
