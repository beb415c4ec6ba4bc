#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Camera matrices, calibration and point helpers.
pub mod camera;

mod error;
pub use error::SfmError;

/// Essential matrix estimation and epipolar geometry.
pub mod essential;

/// Homography estimation and decomposition.
pub mod homography;

/// Linear algebra utilities.
pub mod linalg;

/// Candidate poses of an essential matrix.
pub mod pose;

/// Adaptive RANSAC parameters and iteration budget.
pub mod ransac;

/// Camera translation registration against known 3d points.
pub mod registration;

/// Robust relative pose between two views.
pub mod relative_pose;

/// Absolute rotations from a chain of relative rotations.
pub mod rotation;

/// Homogeneous linear least-squares solver.
pub mod solver;

/// Linear triangulation and cheirality checks.
pub mod triangulation;

#[cfg(test)]
mod test_utils;

pub use camera::Calibration;
pub use ransac::RansacParams;
pub use registration::{RefineParams, TranslationSolver};
pub use relative_pose::{RelativePose, RelativePoseModels};
