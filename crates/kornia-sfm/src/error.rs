use thiserror::Error;

/// Error types for the structure-from-motion estimators.
#[derive(Debug, Error)]
pub enum SfmError {
    /// The homogeneous system has fewer independent equations than it needs.
    #[error("Insufficient constraints: {equations} equations for {unknowns} unknowns")]
    InsufficientConstraints {
        /// Number of rows of the coefficient matrix.
        equations: usize,
        /// Number of columns of the coefficient matrix.
        unknowns: usize,
    },

    /// Invalid input data - insufficient correspondences for the specific estimator.
    #[error("Estimator requires at least {required} correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum number of correspondences required by the estimator.
        required: usize,
        /// Actual number of correspondences provided.
        actual: usize,
    },

    /// Invalid input data - mismatched array lengths with descriptive labels.
    #[error("Mismatched array lengths: {left_name} ({left_len}) != {right_name} ({right_len})")]
    MismatchedArrayLengths {
        /// Label for the left-hand slice.
        left_name: &'static str,
        /// Length of the left-hand slice.
        left_len: usize,
        /// Label for the right-hand slice.
        right_name: &'static str,
        /// Length of the right-hand slice.
        right_len: usize,
    },

    /// The origin camera index is outside of the rotation chain.
    #[error("Origin index {index} is out of bounds for {len} rotations")]
    InvalidOriginIndex {
        /// Requested origin index.
        index: usize,
        /// Number of rotations in the chain.
        len: usize,
    },

    /// No relative rotations were given to the rotation chain.
    #[error("Cannot compose an empty rotation chain")]
    EmptyRotationChain,

    /// The calibration matrix cannot be used to normalize points.
    #[error("Invalid calibration matrix: {0}")]
    InvalidCalibration(String),
}

/// Check that two slices are index-aligned.
pub(crate) fn check_same_length(
    left_name: &'static str,
    left_len: usize,
    right_name: &'static str,
    right_len: usize,
) -> Result<(), SfmError> {
    if left_len != right_len {
        return Err(SfmError::MismatchedArrayLengths {
            left_name,
            left_len,
            right_name,
            right_len,
        });
    }
    Ok(())
}

/// Check that at least `required` correspondences are available.
pub(crate) fn check_min_len(required: usize, actual: usize) -> Result<(), SfmError> {
    if actual < required {
        return Err(SfmError::InsufficientCorrespondences { required, actual });
    }
    Ok(())
}
