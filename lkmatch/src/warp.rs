use nalgebra::{DMatrix, DVector};

use crate::border::BorderMode;
use crate::error::{MatchError, Result};
use crate::gray_image::GrayImage;
use crate::interpolation::{BilinearSampler, ImageSampler};

/// A parametric geometric mapping from reference-patch coordinates to
/// search-image coordinates.
///
/// The parameter vector is the warp's deviation from the identity, so that a
/// zero increment leaves the warp unchanged and increments can be added
/// component-wise.
pub trait WarpModel {
    /// Number of warp parameters `n`; fixed for the lifetime of the value.
    fn parameter_count(&self) -> usize;

    /// Maps `point` through the warp.
    fn apply(&self, point: (f64, f64)) -> (f64, f64);

    /// The 2 × n matrix of partial derivatives of [`WarpModel::apply`] with
    /// respect to each parameter, evaluated at `point`.
    fn jacobian(&self, point: (f64, f64)) -> DMatrix<f64>;

    fn parameters(&self) -> DVector<f64>;

    /// Replaces the parameter vector.
    ///
    /// # Errors
    /// Returns [`MatchError::ParameterCountMismatch`] if `p` does not have
    /// exactly [`WarpModel::parameter_count`] entries.
    fn set_parameters(&mut self, p: &DVector<f64>) -> Result<()>;
}

fn check_len(p: &DVector<f64>, expected: usize) -> Result<()> {
    if p.len() != expected {
        return Err(MatchError::ParameterCountMismatch {
            expected,
            actual: p.len(),
        });
    }
    Ok(())
}

/// The centre of a `width` × `height` patch in its own pixel coordinates,
/// `((width - 1) / 2, (height - 1) / 2)`.
///
/// The matcher measures reference coordinates relative to this point.
pub fn patch_center(width: usize, height: usize) -> (f64, f64) {
    ((width as f64 - 1.0) / 2.0, (height as f64 - 1.0) / 2.0)
}

/// Pure shift, `x' = x + t`. Parameters: `(tx, ty)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Translation {
    pub tx: f64,
    pub ty: f64,
}

impl Translation {
    pub fn new(tx: f64, ty: f64) -> Self {
        Translation { tx, ty }
    }

    /// The translation that lays a `width` × `height` patch exactly over the
    /// search-image region whose top-left pixel is `(x, y)`.
    ///
    /// # Examples
    /// ```
    /// # use lkmatch::warp::Translation;
    /// assert_eq!(Translation::over_region(20, 22, 21, 21), Translation::new(30.0, 32.0));
    /// ```
    pub fn over_region(x: usize, y: usize, width: usize, height: usize) -> Self {
        let (xc, yc) = patch_center(width, height);
        Translation::new(x as f64 + xc, y as f64 + yc)
    }
}

impl WarpModel for Translation {
    fn parameter_count(&self) -> usize {
        2
    }

    fn apply(&self, (x, y): (f64, f64)) -> (f64, f64) {
        (x + self.tx, y + self.ty)
    }

    fn jacobian(&self, _point: (f64, f64)) -> DMatrix<f64> {
        DMatrix::identity(2, 2)
    }

    fn parameters(&self) -> DVector<f64> {
        DVector::from_vec(vec![self.tx, self.ty])
    }

    fn set_parameters(&mut self, p: &DVector<f64>) -> Result<()> {
        check_len(p, 2)?;
        self.tx = p[0];
        self.ty = p[1];
        Ok(())
    }
}

/// A 2D affine mapping:
///
/// ```text
///   X = a00 * x + a01 * y + a02
///   Y = a10 * x + a11 * y + a12
/// ```
///
/// Parameters: `(a00 - 1, a01, a10, a11 - 1, a02, a12)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineWarp {
    pub a00: f64,
    pub a01: f64,
    pub a02: f64,
    pub a10: f64,
    pub a11: f64,
    pub a12: f64,
}

impl Default for AffineWarp {
    fn default() -> Self {
        AffineWarp::identity()
    }
}

impl AffineWarp {
    pub fn identity() -> Self {
        AffineWarp::from_translation(0.0, 0.0)
    }

    /// See [`Translation::over_region`].
    pub fn over_region(x: usize, y: usize, width: usize, height: usize) -> Self {
        let t = Translation::over_region(x, y, width, height);
        AffineWarp::from_translation(t.tx, t.ty)
    }

    pub fn from_translation(tx: f64, ty: f64) -> Self {
        AffineWarp {
            a00: 1.0,
            a01: 0.0,
            a02: tx,
            a10: 0.0,
            a11: 1.0,
            a12: ty,
        }
    }

    /// Rotation by `angle` radians about the origin followed by a shift.
    ///
    /// # Examples
    /// ```
    /// # use lkmatch::warp::{AffineWarp, WarpModel};
    /// let w = AffineWarp::from_rotation(std::f64::consts::FRAC_PI_2, 10.0, 0.0);
    /// let (x, y) = w.apply((1.0, 0.0));
    /// assert!((x - 10.0).abs() < 1e-12 && (y - 1.0).abs() < 1e-12);
    /// ```
    pub fn from_rotation(angle: f64, tx: f64, ty: f64) -> Self {
        let (s, c) = angle.sin_cos();
        AffineWarp {
            a00: c,
            a01: -s,
            a02: tx,
            a10: s,
            a11: c,
            a12: ty,
        }
    }

    pub fn translation(&self) -> (f64, f64) {
        (self.a02, self.a12)
    }
}

impl WarpModel for AffineWarp {
    fn parameter_count(&self) -> usize {
        6
    }

    fn apply(&self, (x, y): (f64, f64)) -> (f64, f64) {
        (
            self.a00 * x + self.a01 * y + self.a02,
            self.a10 * x + self.a11 * y + self.a12,
        )
    }

    fn jacobian(&self, (x, y): (f64, f64)) -> DMatrix<f64> {
        #[rustfmt::skip]
        let j = DMatrix::from_row_slice(2, 6, &[
            x,   y,   0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, x,   y,   0.0, 1.0,
        ]);
        j
    }

    fn parameters(&self) -> DVector<f64> {
        DVector::from_vec(vec![
            self.a00 - 1.0,
            self.a01,
            self.a10,
            self.a11 - 1.0,
            self.a02,
            self.a12,
        ])
    }

    fn set_parameters(&mut self, p: &DVector<f64>) -> Result<()> {
        check_len(p, 6)?;
        self.a00 = p[0] + 1.0;
        self.a01 = p[1];
        self.a10 = p[2];
        self.a11 = p[3] + 1.0;
        self.a02 = p[4];
        self.a12 = p[5];
        Ok(())
    }
}

/// A planar projective mapping (homography) normalized so that `a22 = 1`:
///
/// ```text
///   X = (a00 * x + a01 * y + a02) / (a20 * x + a21 * y + 1)
///   Y = (a10 * x + a11 * y + a12) / (a20 * x + a21 * y + 1)
/// ```
///
/// Parameters: `(a00 - 1, a01, a10, a11 - 1, a02, a12, a20, a21)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectiveWarp {
    pub a00: f64,
    pub a01: f64,
    pub a02: f64,
    pub a10: f64,
    pub a11: f64,
    pub a12: f64,
    pub a20: f64,
    pub a21: f64,
}

impl Default for ProjectiveWarp {
    fn default() -> Self {
        ProjectiveWarp::from_translation(0.0, 0.0)
    }
}

impl From<AffineWarp> for ProjectiveWarp {
    fn from(a: AffineWarp) -> Self {
        ProjectiveWarp {
            a00: a.a00,
            a01: a.a01,
            a02: a.a02,
            a10: a.a10,
            a11: a.a11,
            a12: a.a12,
            a20: 0.0,
            a21: 0.0,
        }
    }
}

impl ProjectiveWarp {
    pub fn from_translation(tx: f64, ty: f64) -> Self {
        AffineWarp::from_translation(tx, ty).into()
    }

    /// See [`Translation::over_region`].
    pub fn over_region(x: usize, y: usize, width: usize, height: usize) -> Self {
        AffineWarp::over_region(x, y, width, height).into()
    }

    pub fn translation(&self) -> (f64, f64) {
        (self.a02, self.a12)
    }
}

impl WarpModel for ProjectiveWarp {
    fn parameter_count(&self) -> usize {
        8
    }

    fn apply(&self, (x, y): (f64, f64)) -> (f64, f64) {
        let c = self.a20 * x + self.a21 * y + 1.0;
        (
            (self.a00 * x + self.a01 * y + self.a02) / c,
            (self.a10 * x + self.a11 * y + self.a12) / c,
        )
    }

    fn jacobian(&self, (x, y): (f64, f64)) -> DMatrix<f64> {
        let a = self.a00 * x + self.a01 * y + self.a02;
        let b = self.a10 * x + self.a11 * y + self.a12;
        let c = self.a20 * x + self.a21 * y + 1.0;
        let c2 = c * c;
        #[rustfmt::skip]
        let j = DMatrix::from_row_slice(2, 8, &[
            x / c, y / c, 0.0,   0.0,   1.0 / c, 0.0,     -x * a / c2, -y * a / c2,
            0.0,   0.0,   x / c, y / c, 0.0,     1.0 / c, -x * b / c2, -y * b / c2,
        ]);
        j
    }

    fn parameters(&self) -> DVector<f64> {
        DVector::from_vec(vec![
            self.a00 - 1.0,
            self.a01,
            self.a10,
            self.a11 - 1.0,
            self.a02,
            self.a12,
            self.a20,
            self.a21,
        ])
    }

    fn set_parameters(&mut self, p: &DVector<f64>) -> Result<()> {
        check_len(p, 8)?;
        self.a00 = p[0] + 1.0;
        self.a01 = p[1];
        self.a10 = p[2];
        self.a11 = p[3] + 1.0;
        self.a02 = p[4];
        self.a12 = p[5];
        self.a20 = p[6];
        self.a21 = p[7];
        Ok(())
    }
}

/// Resamples `search` through `warp` over a `width` × `height` grid, using the
/// same centred patch coordinates as the matcher.
///
/// After a successful match this reproduces the reference patch.
pub fn render_warped<W: WarpModel + ?Sized>(
    search: &GrayImage,
    warp: &W,
    width: usize,
    height: usize,
    border: BorderMode,
) -> GrayImage {
    let sampler = BilinearSampler::new(search, border);
    let (xc, yc) = patch_center(width, height);
    GrayImage::from_fn(width, height, |u, v| {
        let (x, y) = warp.apply((u as f64 - xc, v as f64 - yc));
        sampler.interpolate(x, y) as f32
    })
}
