use crate::border::{map_index, BorderMode};
use crate::gray_image::GrayImage;

/// Reads an image at real-valued coordinates.
///
/// Integer coordinates refer to pixel centres. Implementations must return a
/// defined value for every finite coordinate, including ones far outside the
/// image; what that value is depends on their border policy.
pub trait ImageSampler {
    fn interpolate(&self, x: f64, y: f64) -> f64;
}

/// Bilinear interpolation over the floor-based 2×2 neighbourhood of `(x, y)`.
///
/// # Examples
/// ```
/// # use lkmatch::border::BorderMode;
/// # use lkmatch::gray_image::GrayImage;
/// # use lkmatch::interpolation::{BilinearSampler, ImageSampler};
/// let img = GrayImage::from_vec(2, 2, vec![0.0, 10.0, 20.0, 30.0]).unwrap();
/// let sampler = BilinearSampler::new(&img, BorderMode::Clamp);
/// assert_eq!(sampler.interpolate(0.5, 0.5), 15.0);
/// assert_eq!(sampler.interpolate(-3.0, 0.0), 0.0);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct BilinearSampler<'a> {
    image: &'a GrayImage,
    border: BorderMode,
}

impl<'a> BilinearSampler<'a> {
    pub fn new(image: &'a GrayImage, border: BorderMode) -> Self {
        BilinearSampler { image, border }
    }

    pub fn border(&self) -> BorderMode {
        self.border
    }

    fn pixel(&self, x: isize, y: isize) -> f64 {
        let w = self.image.width();
        let h = self.image.height();
        match (map_index(x, w, self.border), map_index(y, h, self.border)) {
            (Some(xi), Some(yi)) => self.image.pixels()[yi * w + xi] as f64,
            _ => match self.border {
                BorderMode::Constant(c) => c as f64,
                // Only reachable for an empty image.
                BorderMode::Clamp | BorderMode::Reflect101 => 0.0,
            },
        }
    }
}

impl ImageSampler for BilinearSampler<'_> {
    fn interpolate(&self, x: f64, y: f64) -> f64 {
        let u = x.floor();
        let v = y.floor();
        let a = x - u;
        let b = y - v;
        let (u, v) = (u as isize, v as isize);

        let p00 = self.pixel(u, v);
        let (u1, v1) = (u.saturating_add(1), v.saturating_add(1));
        let p10 = self.pixel(u1, v);
        let p01 = self.pixel(u, v1);
        let p11 = self.pixel(u1, v1);

        let top = p00 + a * (p10 - p00);
        let bottom = p01 + a * (p11 - p01);
        top + b * (bottom - top)
    }
}

#[cfg(test)]
mod tests {
    use super::{BilinearSampler, ImageSampler};
    use crate::border::BorderMode;
    use crate::gray_image::GrayImage;

    fn ramp() -> GrayImage {
        GrayImage::from_fn(4, 3, |x, y| (2 * x + 10 * y) as f32)
    }

    #[test]
    fn integer_coordinates_return_pixels_exactly() {
        let img = ramp();
        let s = BilinearSampler::new(&img, BorderMode::Clamp);
        for y in 0..3 {
            for x in 0..4 {
                assert_eq!(s.interpolate(x as f64, y as f64), img.get(x, y).unwrap() as f64);
            }
        }
    }

    #[test]
    fn reproduces_linear_ramp_inside() {
        let img = ramp();
        let s = BilinearSampler::new(&img, BorderMode::Clamp);
        let v = s.interpolate(1.25, 0.5);
        assert!((v - (2.5 + 5.0)).abs() < 1e-12);
    }

    #[test]
    fn border_policies_outside_the_image() {
        let img = GrayImage::from_vec(2, 2, vec![0.0, 10.0, 20.0, 30.0]).unwrap();

        let clamp = BilinearSampler::new(&img, BorderMode::Clamp);
        assert_eq!(clamp.interpolate(-0.25, -0.25), 0.0);
        assert_eq!(clamp.interpolate(5.0, 5.0), 30.0);

        // p00, p10 and p01 fall outside and read 100; p11 is the image's (0, 0).
        let constant = BilinearSampler::new(&img, BorderMode::Constant(100.0));
        assert!((constant.interpolate(-0.25, -0.25) - 43.75).abs() < 1e-12);

        let reflect = BilinearSampler::new(&img, BorderMode::Reflect101);
        assert_eq!(reflect.interpolate(-1.0, 0.0), 10.0);
    }

    #[test]
    fn empty_image_reads_border_constant() {
        let img = GrayImage::default();
        let constant = BilinearSampler::new(&img, BorderMode::Constant(4.0));
        assert_eq!(constant.interpolate(0.0, 0.0), 4.0);
        let clamp = BilinearSampler::new(&img, BorderMode::Clamp);
        assert_eq!(clamp.interpolate(0.3, 0.0), 0.0);
    }
}
