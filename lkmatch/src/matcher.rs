use log::{debug, info, trace, warn};
use nalgebra::{DMatrix, DVector};

use crate::config::MatcherConfig;
use crate::error::{MatchError, Result};
use crate::gradient::gradient_xy;
use crate::gray_image::GrayImage;
use crate::interpolation::{BilinearSampler, ImageSampler};
use crate::linalg::{squared_norm, LinearSolver, LuSolver};
use crate::warp::{patch_center, WarpModel};

/// Why a match stopped without converging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The accumulated Hessian could not be inverted, typically because the
    /// patch carries too little gradient information. The warp was not updated.
    SingularSystem,
    /// The iteration budget ran out. The warp holds the last accepted estimate.
    MaxIterationsExceeded,
}

/// Result of a single call to [`LucasKanadeMatcher::iterate_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationStatus {
    /// The warp was updated and another pass is worthwhile.
    Continuing,
    /// The warp was updated and the increment fell below the tolerance.
    Converged,
    /// No update was made; see the reason.
    Failed(FailureReason),
}

/// Lifecycle of a match.
///
/// ```text
/// Uninitialized -> Iterating -> Converged
///                            -> Failed(SingularSystem | MaxIterationsExceeded)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    Uninitialized,
    Iterating,
    Converged,
    Failed(FailureReason),
}

/// Summary returned by [`LucasKanadeMatcher::run`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOutcome {
    pub status: IterationStatus,
    /// Number of refinement passes performed.
    pub iterations: usize,
    pub rms_error: Option<f64>,
}

/// Per-pixel steepest-descent vectors of one pass, kept for visualization.
#[derive(Debug, Clone, PartialEq)]
pub struct SteepestDescentImages {
    width: usize,
    height: usize,
    parameter_count: usize,
    /// `parameter_count` values per pixel, pixels in row-major order.
    values: Vec<f64>,
}

impl SteepestDescentImages {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    /// The steepest-descent vector at reference pixel `(u, v)`.
    pub fn vector(&self, u: usize, v: usize) -> Option<&[f64]> {
        if u >= self.width || v >= self.height {
            return None;
        }
        let start = (v * self.width + u) * self.parameter_count;
        Some(&self.values[start..start + self.parameter_count])
    }

    /// Component `k` of every steepest-descent vector, laid out as an image
    /// the size of the reference patch.
    pub fn parameter_image(&self, k: usize) -> Option<GrayImage> {
        if k >= self.parameter_count {
            return None;
        }
        let n = self.parameter_count;
        Some(GrayImage::from_fn(self.width, self.height, |u, v| {
            self.values[(v * self.width + u) * n + k] as f32
        }))
    }
}

/// Cached derivatives of the search image, computed on the first pass.
#[derive(Debug, Clone)]
struct GradientField {
    ix: GrayImage,
    iy: GrayImage,
}

impl GradientField {
    fn compute(search: &GrayImage) -> Self {
        trace!(
            "computing gradients of {}x{} search image",
            search.width(),
            search.height()
        );
        let (ix, iy) = gradient_xy(search);
        GradientField { ix, iy }
    }
}

/// The linear system gathered over the reference patch in one pass.
struct PassSystem {
    hessian: DMatrix<f64>,
    gradient_residual: DVector<f64>,
    sqr_error: f64,
    steepest_descent: Option<SteepestDescentImages>,
}

/// Forward-additive Lucas-Kanade matcher.
///
/// Estimates the parameters of a warp that maps the reference patch `R` onto
/// the search image `I`. Reference coordinates are measured from the centre
/// of `R` (see [`patch_center`]), so a [`crate::warp::Translation`] of
/// `(tx, ty)` places the centre of `R` at `(tx, ty)` in `I`.
///
/// # How It Works
/// Each call to [`LucasKanadeMatcher::iterate_once`] performs one pass:
/// 1. For every pixel of `R` in row-major order, the patch coordinate is
///    warped into `I`, where the interpolated gradient and intensity are read.
/// 2. The gradient is projected through the warp Jacobian (evaluated at the
///    unwarped patch coordinate) to form the steepest-descent vector, whose
///    outer product and residual-weighted value are summed into the Hessian
///    and the gradient-residual vector.
/// 3. The normal equations are solved for a parameter increment, which is
///    added to the warp's parameters.
///
/// The matcher never owns the warp; the caller passes the same estimate to
/// every call and decides what to do on failure.
///
/// # Examples
/// ```
/// # use lkmatch::config::MatcherConfig;
/// # use lkmatch::gray_image::GrayImage;
/// # use lkmatch::matcher::{IterationStatus, LucasKanadeMatcher};
/// # use lkmatch::warp::{patch_center, Translation, WarpModel};
/// let search = GrayImage::from_fn(40, 40, |x, y| {
///     let (x, y) = (x as f32, y as f32);
///     100.0 + 40.0 * (0.3 * x).sin() + 30.0 * (0.25 * y + 0.1 * x).cos()
/// });
/// let reference = search.crop(12, 10, 15, 15).unwrap();
/// let (xc, yc) = patch_center(15, 15);
///
/// let mut matcher = LucasKanadeMatcher::new(search, reference, MatcherConfig::default()).unwrap();
/// let mut warp = Translation::new(12.0 + xc + 0.6, 10.0 + yc - 0.4);
/// let outcome = matcher.run(&mut warp).unwrap();
///
/// assert_eq!(outcome.status, IterationStatus::Converged);
/// assert!((warp.tx - (12.0 + xc)).abs() < 0.01);
/// assert!((warp.ty - (10.0 + yc)).abs() < 0.01);
/// ```
#[derive(Debug, Clone)]
pub struct LucasKanadeMatcher<S = LuSolver> {
    search: GrayImage,
    reference: GrayImage,
    config: MatcherConfig,
    solver: S,
    gradients: Option<GradientField>,
    state: MatchState,
    /// Number of warp parameters, recorded from the first warp seen.
    parameter_count: Option<usize>,
    iteration: usize,
    sqr_error: Option<f64>,
    qmag: Option<f64>,
    hessian: Option<DMatrix<f64>>,
    gradient_residual: Option<DVector<f64>>,
    steepest_descent: Option<SteepestDescentImages>,
}

impl LucasKanadeMatcher<LuSolver> {
    /// Creates a matcher for the search image `search` and reference patch
    /// `reference`, solving with the default [`LuSolver`].
    ///
    /// # Errors
    /// Fails if either image is empty or `config` does not validate.
    pub fn new(search: GrayImage, reference: GrayImage, config: MatcherConfig) -> Result<Self> {
        LucasKanadeMatcher::with_solver(search, reference, config, LuSolver::default())
    }
}

impl<S: LinearSolver> LucasKanadeMatcher<S> {
    /// Like [`LucasKanadeMatcher::new`] with a caller-chosen linear solver.
    pub fn with_solver(
        search: GrayImage,
        reference: GrayImage,
        config: MatcherConfig,
        solver: S,
    ) -> Result<Self> {
        if search.is_empty() {
            return Err(MatchError::EmptyImage("search"));
        }
        if reference.is_empty() {
            return Err(MatchError::EmptyImage("reference"));
        }
        config.validate()?;

        Ok(LucasKanadeMatcher {
            search,
            reference,
            config,
            solver,
            gradients: None,
            state: MatchState::Uninitialized,
            parameter_count: None,
            iteration: 0,
            sqr_error: None,
            qmag: None,
            hessian: None,
            gradient_residual: None,
            steepest_descent: None,
        })
    }

    pub fn search(&self) -> &GrayImage {
        &self.search
    }

    pub fn reference(&self) -> &GrayImage {
        &self.reference
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn state(&self) -> MatchState {
        self.state
    }

    /// Number of refinement passes performed since the match started.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// The warp parameter count fixed at the first pass, if any.
    pub fn parameter_count(&self) -> Option<usize> {
        self.parameter_count
    }

    pub fn has_converged(&self) -> bool {
        self.state == MatchState::Converged
    }

    /// `sqrt` of the summed squared residuals of the latest pass.
    ///
    /// `None` until a pass has completed. This is a monitoring signal; the
    /// convergence test only looks at the parameter increment.
    pub fn rms_error(&self) -> Option<f64> {
        self.sqr_error.map(f64::sqrt)
    }

    /// Squared norm of the latest accepted parameter increment.
    pub fn last_update_magnitude(&self) -> Option<f64> {
        self.qmag
    }

    /// The Hessian accumulated by the latest pass.
    pub fn last_hessian(&self) -> Option<&DMatrix<f64>> {
        self.hessian.as_ref()
    }

    /// The gradient-residual vector accumulated by the latest pass.
    pub fn last_gradient_residual(&self) -> Option<&DVector<f64>> {
        self.gradient_residual.as_ref()
    }

    /// Steepest-descent vectors of the latest pass, if
    /// [`MatcherConfig::retain_steepest_descent`] is set.
    pub fn steepest_descent_images(&self) -> Option<&SteepestDescentImages> {
        self.steepest_descent.as_ref()
    }

    /// Returns the matcher to [`MatchState::Uninitialized`] so that a new
    /// initial estimate can be refined. The search-image gradients are kept.
    pub fn reset(&mut self) {
        self.state = MatchState::Uninitialized;
        self.parameter_count = None;
        self.iteration = 0;
        self.sqr_error = None;
        self.qmag = None;
        self.hessian = None;
        self.gradient_residual = None;
        self.steepest_descent = None;
    }

    /// Performs one refinement pass and updates `warp` in place on success.
    ///
    /// Once the match has converged or failed, further calls return the same
    /// status without touching the warp.
    ///
    /// # Errors
    /// Returns [`MatchError::ParameterCountMismatch`] if `warp` does not have
    /// the parameter count of the warp the match was started with. Changing
    /// the warp type mid-match requires [`LucasKanadeMatcher::reset`].
    pub fn iterate_once<W: WarpModel + ?Sized>(&mut self, warp: &mut W) -> Result<IterationStatus> {
        match self.state {
            MatchState::Converged => return Ok(IterationStatus::Converged),
            MatchState::Failed(reason) => return Ok(IterationStatus::Failed(reason)),
            MatchState::Uninitialized => self.initialize(warp),
            MatchState::Iterating => {}
        }

        let n = self.parameter_count.unwrap_or_else(|| warp.parameter_count());
        if warp.parameter_count() != n {
            return Err(MatchError::ParameterCountMismatch {
                expected: n,
                actual: warp.parameter_count(),
            });
        }
        let p = warp.parameters();
        if p.len() != n {
            return Err(MatchError::ParameterCountMismatch {
                expected: n,
                actual: p.len(),
            });
        }

        if self.iteration >= self.config.max_iterations {
            warn!(
                "no convergence after {} iterations (last update magnitude {:?})",
                self.iteration, self.qmag
            );
            self.state = MatchState::Failed(FailureReason::MaxIterationsExceeded);
            return Ok(IterationStatus::Failed(FailureReason::MaxIterationsExceeded));
        }
        self.iteration += 1;

        let search = &self.search;
        let gradients = self
            .gradients
            .get_or_insert_with(|| GradientField::compute(search));
        let system = accumulate_system(
            &self.reference,
            search,
            gradients,
            &self.config,
            &*warp,
            n,
        );
        self.sqr_error = Some(system.sqr_error);
        let solution = self.solver.solve(&system.hessian, &system.gradient_residual);
        self.hessian = Some(system.hessian);
        self.gradient_residual = Some(system.gradient_residual);
        self.steepest_descent = system.steepest_descent;

        let q = match solution {
            Some(q) => q,
            None => {
                warn!(
                    "singular Hessian at iteration {}; the patch lacks gradient information",
                    self.iteration
                );
                self.state = MatchState::Failed(FailureReason::SingularSystem);
                return Ok(IterationStatus::Failed(FailureReason::SingularSystem));
            }
        };

        warp.set_parameters(&(p + &q))?;
        let qmag = squared_norm(&q);
        self.qmag = Some(qmag);

        debug!(
            "iteration {}: rms error {:.6}, update magnitude {:.3e}",
            self.iteration,
            system.sqr_error.sqrt(),
            qmag
        );

        if qmag < self.config.tolerance {
            info!("converged after {} iterations", self.iteration);
            self.state = MatchState::Converged;
            Ok(IterationStatus::Converged)
        } else {
            self.state = MatchState::Iterating;
            Ok(IterationStatus::Continuing)
        }
    }

    /// Calls [`LucasKanadeMatcher::iterate_once`] until the match converges
    /// or fails.
    ///
    /// The loop is bounded by [`MatcherConfig::max_iterations`].
    pub fn run<W: WarpModel + ?Sized>(&mut self, warp: &mut W) -> Result<MatchOutcome> {
        loop {
            let status = self.iterate_once(warp)?;
            if status != IterationStatus::Continuing {
                return Ok(MatchOutcome {
                    status,
                    iterations: self.iteration,
                    rms_error: self.rms_error(),
                });
            }
        }
    }

    fn initialize<W: WarpModel + ?Sized>(&mut self, warp: &W) {
        let n = warp.parameter_count();
        debug!(
            "starting match: {}x{} reference in {}x{} search image, {} warp parameters",
            self.reference.width(),
            self.reference.height(),
            self.search.width(),
            self.search.height(),
            n
        );
        self.parameter_count = Some(n);
        self.iteration = 0;
        self.state = MatchState::Iterating;
    }
}

/// Sums the Hessian, gradient-residual vector and squared error over the
/// reference patch. Pixels are visited row by row so that the floating-point
/// sums are reproducible.
fn accumulate_system<W: WarpModel + ?Sized>(
    reference: &GrayImage,
    search: &GrayImage,
    gradients: &GradientField,
    config: &MatcherConfig,
    warp: &W,
    n: usize,
) -> PassSystem {
    let border = config.border_mode;
    let sample_i = BilinearSampler::new(search, border);
    let sample_ix = BilinearSampler::new(&gradients.ix, border);
    let sample_iy = BilinearSampler::new(&gradients.iy, border);

    let width = reference.width();
    let height = reference.height();
    let (xc, yc) = patch_center(width, height);
    let r = reference.pixels();

    let mut hessian = DMatrix::zeros(n, n);
    let mut gradient_residual = DVector::zeros(n);
    let mut sqr_error = 0.0;
    let mut steepest = if config.retain_steepest_descent {
        Some(Vec::with_capacity(width * height * n))
    } else {
        None
    };

    for v in 0..height {
        for u in 0..width {
            let x = (u as f64 - xc, v as f64 - yc);
            let (xw, yw) = warp.apply(x);

            let gx = sample_ix.interpolate(xw, yw);
            let gy = sample_iy.interpolate(xw, yw);

            // Forward-additive: the Jacobian is taken at the unwarped position.
            let j = warp.jacobian(x);
            let s = DVector::from_fn(n, |k, _| gx * j[(0, k)] + gy * j[(1, k)]);

            hessian.ger(1.0, &s, &s, 1.0);

            let d = r[v * width + u] as f64 - sample_i.interpolate(xw, yw);
            sqr_error += d * d;
            gradient_residual.axpy(d, &s, 1.0);

            if let Some(buf) = steepest.as_mut() {
                buf.extend(s.iter());
            }
        }
    }

    PassSystem {
        hessian,
        gradient_residual,
        sqr_error,
        steepest_descent: steepest.map(|values| SteepestDescentImages {
            width,
            height,
            parameter_count: n,
            values,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradient::gradient_x;
    use crate::warp::{AffineWarp, Translation};

    fn texture(width: usize, height: usize) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let (x, y) = (x as f32, y as f32);
            120.0 + 50.0 * (0.31 * x + 0.05 * y).sin() + 35.0 * (0.27 * y - 0.12 * x).cos()
        })
    }

    /// A 15x15 patch cut at (10, 8), and the translation that aligns it.
    fn setup(config: MatcherConfig) -> (LucasKanadeMatcher, Translation) {
        let search = texture(40, 36);
        let reference = search.crop(10, 8, 15, 15).unwrap();
        let matcher = LucasKanadeMatcher::new(search, reference, config).unwrap();
        (matcher, Translation::new(17.0, 15.0))
    }

    #[test]
    fn construction_rejects_empty_images_and_bad_config() {
        let img = texture(8, 8);
        let config = MatcherConfig::default();
        assert_eq!(
            LucasKanadeMatcher::new(GrayImage::default(), img.clone(), config).unwrap_err(),
            MatchError::EmptyImage("search")
        );
        assert_eq!(
            LucasKanadeMatcher::new(img.clone(), GrayImage::new(0, 3, 0.0), config).unwrap_err(),
            MatchError::EmptyImage("reference")
        );
        assert!(LucasKanadeMatcher::new(img.clone(), img, config.with_max_iterations(0)).is_err());
    }

    #[test]
    fn queries_are_empty_before_the_first_pass() {
        let (matcher, _) = setup(MatcherConfig::default());
        assert_eq!(matcher.state(), MatchState::Uninitialized);
        assert_eq!(matcher.iteration(), 0);
        assert_eq!(matcher.parameter_count(), None);
        assert_eq!(matcher.rms_error(), None);
        assert_eq!(matcher.last_update_magnitude(), None);
        assert!(matcher.last_hessian().is_none());
        assert!(!matcher.has_converged());
    }

    #[test]
    fn first_pass_records_parameter_count_and_system() {
        let (mut matcher, aligned) = setup(MatcherConfig::default());
        let mut warp = AffineWarp::from_translation(aligned.tx + 0.5, aligned.ty - 0.5);
        let status = matcher.iterate_once(&mut warp).unwrap();

        assert_eq!(status, IterationStatus::Continuing);
        assert_eq!(matcher.state(), MatchState::Iterating);
        assert_eq!(matcher.parameter_count(), Some(6));
        assert_eq!(matcher.iteration(), 1);
        let h = matcher.last_hessian().unwrap();
        assert_eq!(h.shape(), (6, 6));
        assert!((h - h.transpose()).amax() == 0.0);
        assert_eq!(matcher.last_gradient_residual().unwrap().len(), 6);
        assert!(matcher.rms_error().unwrap() > 0.0);
        assert!(matcher.last_update_magnitude().unwrap() > 0.0);
    }

    #[test]
    fn mismatched_warp_is_rejected_without_changes() {
        let (mut matcher, aligned) = setup(MatcherConfig::default());
        let mut translation = Translation::new(aligned.tx + 0.5, aligned.ty);
        matcher.iterate_once(&mut translation).unwrap();

        let mut affine = AffineWarp::from_translation(aligned.tx, aligned.ty);
        let err = matcher.iterate_once(&mut affine).unwrap_err();
        assert_eq!(err, MatchError::ParameterCountMismatch { expected: 2, actual: 6 });
        assert_eq!(affine, AffineWarp::from_translation(aligned.tx, aligned.ty));
        assert_eq!(matcher.iteration(), 1);

        matcher.reset();
        assert!(matcher.iterate_once(&mut affine).is_ok());
        assert_eq!(matcher.parameter_count(), Some(6));
    }

    #[test]
    fn terminal_states_are_sticky() {
        let (mut matcher, aligned) = setup(MatcherConfig::default());
        let mut warp = aligned;
        assert_eq!(matcher.iterate_once(&mut warp).unwrap(), IterationStatus::Converged);
        assert!(matcher.has_converged());

        let mut moved = Translation::new(aligned.tx + 3.0, aligned.ty);
        assert_eq!(matcher.iterate_once(&mut moved).unwrap(), IterationStatus::Converged);
        assert_eq!(moved, Translation::new(aligned.tx + 3.0, aligned.ty));
        assert_eq!(matcher.iteration(), 1);
    }

    #[test]
    fn budget_exhaustion_leaves_the_last_estimate() {
        let config = MatcherConfig::default()
            .with_tolerance(1e-300)
            .with_max_iterations(2);
        let (mut matcher, aligned) = setup(config);
        let mut warp = Translation::new(aligned.tx + 1.0, aligned.ty + 0.7);

        assert_eq!(matcher.iterate_once(&mut warp).unwrap(), IterationStatus::Continuing);
        assert_eq!(matcher.iterate_once(&mut warp).unwrap(), IterationStatus::Continuing);
        let after_two = warp;

        let status = matcher.iterate_once(&mut warp).unwrap();
        assert_eq!(status, IterationStatus::Failed(FailureReason::MaxIterationsExceeded));
        assert_eq!(warp, after_two);
        assert_eq!(matcher.iteration(), 2);
        assert!(!matcher.has_converged());
    }

    #[test]
    fn run_reports_iterations_and_error() {
        let (mut matcher, aligned) = setup(MatcherConfig::default().with_tolerance(1e-10));
        let mut warp = Translation::new(aligned.tx - 0.8, aligned.ty + 0.6);
        let outcome = matcher.run(&mut warp).unwrap();

        assert_eq!(outcome.status, IterationStatus::Converged);
        assert_eq!(outcome.iterations, matcher.iteration());
        assert!(outcome.iterations > 1);
        assert_eq!(outcome.rms_error, matcher.rms_error());
        assert!((warp.tx - aligned.tx).abs() < 1e-3);
        assert!((warp.ty - aligned.ty).abs() < 1e-3);
    }

    #[test]
    fn reset_allows_a_new_estimate() {
        let (mut matcher, aligned) = setup(MatcherConfig::default());
        let mut first = aligned;
        matcher.run(&mut first).unwrap();
        assert!(matcher.has_converged());

        matcher.reset();
        assert_eq!(matcher.state(), MatchState::Uninitialized);
        assert_eq!(matcher.iteration(), 0);
        assert_eq!(matcher.rms_error(), None);

        let mut second = Translation::new(aligned.tx + 0.5, aligned.ty + 0.5);
        assert_eq!(matcher.iterate_once(&mut second).unwrap(), IterationStatus::Continuing);
        assert_eq!(matcher.iteration(), 1);
    }

    #[test]
    fn steepest_descent_is_opt_in() {
        let (mut matcher, aligned) = setup(MatcherConfig::default());
        let mut warp = aligned;
        matcher.iterate_once(&mut warp).unwrap();
        assert!(matcher.steepest_descent_images().is_none());
    }

    #[test]
    fn retained_steepest_descent_of_a_translation_is_the_gradient() {
        let config = MatcherConfig::default().with_steepest_descent_retained(true);
        let (mut matcher, aligned) = setup(config);
        let mut warp = aligned;
        matcher.iterate_once(&mut warp).unwrap();

        let sd = matcher.steepest_descent_images().unwrap();
        assert_eq!((sd.width(), sd.height(), sd.parameter_count()), (15, 15, 2));
        assert_eq!(sd.vector(0, 0).unwrap().len(), 2);
        assert!(sd.vector(15, 0).is_none());
        assert!(sd.parameter_image(2).is_none());

        let expected = gradient_x(matcher.search()).crop(10, 8, 15, 15).unwrap();
        assert_eq!(sd.parameter_image(0).unwrap(), expected);
    }
}
