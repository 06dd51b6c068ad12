use nalgebra::{DMatrix, DVector};

/// Solves the square linear system `H · q = b`.
///
/// Returns `None` when the system is singular or too ill-conditioned by the
/// solver's own criterion; the matcher reports that as a failed pass.
pub trait LinearSolver {
    fn solve(&self, h: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>>;
}

/// Partial-pivot LU decomposition with a relative pivot threshold.
///
/// The system is rejected if `H` is all zeros, if any pivot of `U` is not
/// larger than `singularity_threshold` times the largest pivot, or if the
/// solution contains non-finite values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LuSolver {
    pub singularity_threshold: f64,
}

impl Default for LuSolver {
    fn default() -> Self {
        LuSolver {
            singularity_threshold: 1e-12,
        }
    }
}

impl LuSolver {
    pub fn new(singularity_threshold: f64) -> Self {
        LuSolver {
            singularity_threshold,
        }
    }
}

impl LinearSolver for LuSolver {
    fn solve(&self, h: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
        if !h.is_square() || h.nrows() != b.len() || h.nrows() == 0 {
            return None;
        }

        let lu = h.clone().lu();
        let pivots: Vec<f64> = lu.u().diagonal().iter().map(|p| p.abs()).collect();
        let largest = pivots.iter().cloned().fold(0.0, f64::max);
        if largest <= 0.0 || !largest.is_finite() {
            return None;
        }
        if pivots.iter().any(|&p| p <= self.singularity_threshold * largest) {
            return None;
        }

        lu.solve(b).filter(|q| q.iter().all(|v| v.is_finite()))
    }
}

/// Squared Euclidean norm `‖v‖²`.
pub fn squared_norm(v: &DVector<f64>) -> f64 {
    v.norm_squared()
}
