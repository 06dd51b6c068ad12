use thiserror::Error;

/// Contract violations reported by the matcher and its collaborators.
///
/// Numerical outcomes of a refinement pass (a singular system, an exhausted
/// iteration budget) are not errors; they are reported through
/// [`crate::matcher::IterationStatus`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("pixel buffer size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("the {0} image is empty")]
    EmptyImage(&'static str),

    #[error("region at ({x}, {y}) of size {width}x{height} lies outside the {image_width}x{image_height} image")]
    RegionOutOfBounds {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        image_width: usize,
        image_height: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("warp has {actual} parameters but {expected} were expected")]
    ParameterCountMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, MatchError>;
