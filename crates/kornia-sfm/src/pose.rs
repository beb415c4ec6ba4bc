use glam::{DMat3, DVec3};

use crate::camera::compose_camera;
use crate::linalg;

const W: DMat3 = DMat3::from_cols(
    DVec3::new(0.0, -1.0, 0.0),
    DVec3::new(1.0, 0.0, 0.0),
    DVec3::new(0.0, 0.0, 1.0),
);
const Z: DMat3 = DMat3::from_cols(
    DVec3::new(0.0, 1.0, 0.0),
    DVec3::new(-1.0, 0.0, 0.0),
    DVec3::new(0.0, 0.0, 0.0),
);

/// Decompose an essential matrix into the four candidate cameras `[R | t]`.
///
/// The right singular vectors are negated when `det(U * Vt) < 0` so both rotations
/// `U * W * Vt` and `U * W^T * Vt` are proper. The translations are read from the
/// skew-symmetric matrices `U * Z * U^T` and `U * Z^T * U^T` and have unit norm.
///
/// # Returns
///
/// The candidates in the order `[R1 | t1]`, `[R1 | t2]`, `[R2 | t1]`, `[R2 | t2]`.
/// Exactly one of them places the scene in front of both cameras, see
/// [`crate::triangulation::select_valid_candidate`].
pub fn extract_poses(e: &[[f64; 3]; 3]) -> [[[f64; 4]; 3]; 4] {
    let mut svd = linalg::svd3(&linalg::to_dmat3(e));
    if (svd.u * svd.vt).determinant() < 0.0 {
        svd.negate_vt();
    }
    let u = svd.u;

    let r1 = linalg::from_dmat3(&(u * W * svd.vt));
    let r2 = linalg::from_dmat3(&(u * W.transpose() * svd.vt));

    let t1 = linalg::skew_symmetric_vector(&(u * Z * u.transpose())).to_array();
    let t2 = linalg::skew_symmetric_vector(&(u * Z.transpose() * u.transpose())).to_array();

    [
        compose_camera(&r1, &t1),
        compose_camera(&r1, &t2),
        compose_camera(&r2, &t1),
        compose_camera(&r2, &t2),
    ]
}
