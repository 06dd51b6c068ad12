//! # LKMatch Library
//!
//! The `lkmatch` library locates a small reference patch inside a larger search
//! image with sub-pixel accuracy. Starting from a rough initial estimate of a
//! geometric warp (translation, affine or projective), the forward-additive
//! Lucas-Kanade algorithm repeatedly linearizes the intensity difference between
//! the patch and the warped search image and solves a small least-squares system
//! for a parameter correction, until the correction becomes negligible.
//!
//! ## Overview of Modules
//!
//! - **`matcher`**: The `LucasKanadeMatcher` state machine. Performs one refinement
//!   pass per call, tracks convergence and failure, and exposes the residual error and
//!   the last linear system for inspection.
//!
//! - **`warp`**: The `WarpModel` trait and the `Translation`, `AffineWarp` and
//!   `ProjectiveWarp` models with their parameter vectors and Jacobians, plus
//!   `render_warped` for resampling the matched region.
//!
//! - **`gray_image`**: Defines `GrayImage`, a single-channel `f32` raster with
//!   conversions from and to RGBA byte buffers.
//!
//! - **`gradient`**: Sobel derivatives of a search image.
//!
//! - **`interpolation`**: Bilinear sampling at fractional coordinates through the
//!   `ImageSampler` trait.
//!
//! - **`border`**: Border policies for reads outside the image extent.
//!
//! - **`linalg`**: The `LinearSolver` seam and the default LU-based solver.
//!
//! - **`config`**: `MatcherConfig`, the tolerance and iteration budget of a match.
//!
//! - **`error`**: The `MatchError` type shared by the crate.

pub mod border;
pub mod config;
pub mod error;
pub mod gradient;
pub mod gray_image;
pub mod interpolation;
pub mod linalg;
pub mod matcher;
pub mod warp;

pub use config::MatcherConfig;
pub use error::{MatchError, Result};
pub use gray_image::GrayImage;
pub use matcher::{FailureReason, IterationStatus, LucasKanadeMatcher, MatchOutcome, MatchState};
pub use warp::{AffineWarp, ProjectiveWarp, Translation, WarpModel};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
