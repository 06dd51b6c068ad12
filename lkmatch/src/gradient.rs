//! Spatial derivatives of a search image.
//!
//! Both directions use the 3×3 Sobel operator scaled by 1/8, so a linear ramp
//! of slope `s` produces a gradient of exactly `s`. Pixels beyond the border
//! repeat the nearest edge pixel.

use crate::gray_image::GrayImage;

/// Horizontal derivative `∂I/∂x`. Positive where intensity grows to the right.
pub fn gradient_x(image: &GrayImage) -> GrayImage {
    sobel(image, |p| {
        (p[0][2] - p[0][0]) + 2.0 * (p[1][2] - p[1][0]) + (p[2][2] - p[2][0])
    })
}

/// Vertical derivative `∂I/∂y`. Positive where intensity grows downward.
pub fn gradient_y(image: &GrayImage) -> GrayImage {
    sobel(image, |p| {
        (p[2][0] - p[0][0]) + 2.0 * (p[2][1] - p[0][1]) + (p[2][2] - p[0][2])
    })
}

/// Both derivatives at once, `(Ix, Iy)`.
pub fn gradient_xy(image: &GrayImage) -> (GrayImage, GrayImage) {
    (gradient_x(image), gradient_y(image))
}

/// Applies `kernel` to the clamped 3×3 neighbourhood of every pixel
/// (`p[row][col]`, centre at `p[1][1]`) and scales the result by 1/8.
fn sobel<F>(image: &GrayImage, kernel: F) -> GrayImage
where
    F: Fn(&[[f32; 3]; 3]) -> f32,
{
    let w = image.width();
    let h = image.height();
    if image.is_empty() {
        return GrayImage::default();
    }
    let px = image.pixels();

    GrayImage::from_fn(w, h, |x, y| {
        let xs = [x.saturating_sub(1), x, (x + 1).min(w - 1)];
        let ys = [y.saturating_sub(1), y, (y + 1).min(h - 1)];
        let mut p = [[0.0f32; 3]; 3];
        for (row, &yy) in ys.iter().enumerate() {
            for (col, &xx) in xs.iter().enumerate() {
                p[row][col] = px[yy * w + xx];
            }
        }
        kernel(&p) / 8.0
    })
}
