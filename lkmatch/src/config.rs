use crate::border::BorderMode;
use crate::error::{MatchError, Result};

/// Settings for one match run. Fixed once the matcher is constructed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatcherConfig {
    /// A pass converges when the squared norm of its parameter increment
    /// falls below this value.
    pub tolerance: f64,
    /// Number of refinement passes allowed before the match is reported as
    /// not converging.
    pub max_iterations: usize,
    /// Keep the per-pixel steepest-descent vectors of the latest pass for
    /// inspection. Costs `width * height * n` values.
    pub retain_steepest_descent: bool,
    /// How the search image and its gradients are read outside their extent.
    pub border_mode: BorderMode,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        MatcherConfig {
            tolerance: 1e-5,
            max_iterations: 100,
            retain_steepest_descent: false,
            border_mode: BorderMode::Clamp,
        }
    }
}

impl MatcherConfig {
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_steepest_descent_retained(mut self, retain: bool) -> Self {
        self.retain_steepest_descent = retain;
        self
    }

    pub fn with_border_mode(mut self, border_mode: BorderMode) -> Self {
        self.border_mode = border_mode;
        self
    }

    /// Checks that the tolerance is positive and finite and that at least
    /// one iteration is allowed.
    ///
    /// # Examples
    /// ```
    /// # use lkmatch::config::MatcherConfig;
    /// assert!(MatcherConfig::default().validate().is_ok());
    /// assert!(MatcherConfig::default().with_tolerance(0.0).validate().is_err());
    /// assert!(MatcherConfig::default().with_max_iterations(0).validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(MatchError::InvalidConfig(format!(
                "tolerance must be a positive finite number, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(MatchError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if let BorderMode::Constant(c) = self.border_mode {
            if !c.is_finite() {
                return Err(MatchError::InvalidConfig(format!(
                    "border constant must be finite, got {c}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_every_field() {
        let config = MatcherConfig::default()
            .with_tolerance(1e-8)
            .with_max_iterations(7)
            .with_steepest_descent_retained(true)
            .with_border_mode(BorderMode::Constant(0.0));
        assert_eq!(config.tolerance, 1e-8);
        assert_eq!(config.max_iterations, 7);
        assert!(config.retain_steepest_descent);
        assert_eq!(config.border_mode, BorderMode::Constant(0.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_non_finite_values() {
        let base = MatcherConfig::default();
        assert!(base.with_tolerance(f64::NAN).validate().is_err());
        assert!(base.with_tolerance(f64::INFINITY).validate().is_err());
        assert!(base.with_tolerance(-1.0).validate().is_err());
        assert!(base
            .with_border_mode(BorderMode::Constant(f32::NAN))
            .validate()
            .is_err());
    }
}
