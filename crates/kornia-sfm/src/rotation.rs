use crate::error::SfmError;
use crate::linalg;

/// Chain relative rotations into absolute rotations expressed in the frame of one camera.
///
/// The first relative rotation seeds the chain and every following one is applied on the
/// left, `R_{i+1} = R_rel_{i+1} * R_i`. Each following rotation with a negative
/// determinant is negated and then snapped to the closest rotation `U * Vt` before use.
/// The seed is used as given. Finally all rotations are re-expressed relative to the camera at
/// `origin_idx`, `R_i <- R_origin^-1 * R_i`, so that camera ends up with the identity.
///
/// # Arguments
///
/// * `relative_rotations` - The rotations between consecutive cameras.
/// * `origin_idx` - The index of the camera that becomes the reference frame.
///
/// # Returns
///
/// One absolute rotation per relative rotation.
///
/// Example:
///
/// ```
/// use kornia_sfm::linalg::IDENTITY_MAT33;
/// use kornia_sfm::rotation::compose_absolute_rotations;
///
/// let rotations = compose_absolute_rotations(&[IDENTITY_MAT33; 3], 1).unwrap();
/// assert_eq!(rotations.len(), 3);
/// ```
pub fn compose_absolute_rotations(
    relative_rotations: &[[[f64; 3]; 3]],
    origin_idx: usize,
) -> Result<Vec<[[f64; 3]; 3]>, SfmError> {
    let Some(first) = relative_rotations.first() else {
        return Err(SfmError::EmptyRotationChain);
    };
    if origin_idx >= relative_rotations.len() {
        return Err(SfmError::InvalidOriginIndex {
            index: origin_idx,
            len: relative_rotations.len(),
        });
    }

    let mut absolute = Vec::with_capacity(relative_rotations.len());
    absolute.push(linalg::to_dmat3(first));
    for (i, rel) in relative_rotations.iter().enumerate().skip(1) {
        let mut r2 = linalg::to_dmat3(rel);
        let det = r2.determinant();
        if det < 0.0 {
            log::warn!("relative rotation {i} has det {det} < 0, negating it");
            r2 = r2 * -1.0;
        }
        let r2 = linalg::nearest_rotation(&r2);
        absolute.push(r2 * absolute[i - 1]);
    }

    let origin = absolute[origin_idx];
    let origin_inv = linalg::try_inverse(&origin).unwrap_or_else(|| origin.transpose());
    Ok(absolute
        .iter()
        .map(|r| linalg::from_dmat3(&(origin_inv * *r)))
        .collect())
}
