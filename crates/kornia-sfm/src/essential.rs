use glam::DVec3;

use crate::error::{check_same_length, SfmError};
use crate::linalg;
use crate::ransac::inlier_fraction;
use crate::solver::solve_homogeneous;

/// Relative singular value tolerance used to decide the numerical rank of an essential matrix.
pub const ESSENTIAL_RANK_TOLERANCE: f64 = 1e-10;

/// Estimate the essential matrix from normalized correspondences with the 8-point algorithm.
///
/// Every correspondence contributes the equation `x2^T * E * x1 = 0`.
///
/// # Arguments
///
/// * `x1` - The homogeneous normalized points in the first view (at least 8).
/// * `x2` - The homogeneous normalized points in the second view.
/// * `enforce_rank2` - Project the solution to the essential manifold with singular values `(1, 1, 0)`.
///
/// # Returns
///
/// The essential matrix scaled so that its bottom-right entry is one. When that entry
/// vanishes the unit-norm solution is returned as is.
pub fn estimate_essential(
    x1: &[[f64; 3]],
    x2: &[[f64; 3]],
    enforce_rank2: bool,
) -> Result<[[f64; 3]; 3], SfmError> {
    check_same_length("x1", x1.len(), "x2", x2.len())?;

    // one row per correspondence: vec(x2 * x1^T)
    let mut mat_m = faer::Mat::<f64>::zeros(x1.len(), 9);
    for (i, (p1, p2)) in x1.iter().zip(x2.iter()).enumerate() {
        for r in 0..3 {
            for c in 0..3 {
                mat_m.write(i, 3 * r + c, p2[r] * p1[c]);
            }
        }
    }

    let e = solve_homogeneous(mat_m.as_ref())?;
    let mut e = [[e[0], e[1], e[2]], [e[3], e[4], e[5]], [e[6], e[7], e[8]]];

    if enforce_rank2 {
        e = enforce_essential_constraints(&e);
    }

    Ok(normalize_essential(&e))
}

/// Scale an essential matrix so that its bottom-right entry is one.
///
/// Matrices whose bottom-right entry vanishes are returned unchanged.
pub fn normalize_essential(e: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    if e[2][2].abs() > f64::EPSILON {
        linalg::from_dmat3(&(linalg::to_dmat3(e) * (1.0 / e[2][2])))
    } else {
        *e
    }
}

/// Enforce the `(1, 1, 0)` singular value constraint on an essential matrix.
///
/// The right singular vectors are negated when needed so that `det(U * Vt) > 0`.
pub fn enforce_essential_constraints(e: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut svd = linalg::svd3(&linalg::to_dmat3(e));
    if (svd.u * svd.vt).determinant() < 0.0 {
        svd.negate_vt();
    }
    linalg::from_dmat3(&svd.compose(DVec3::new(1.0, 1.0, 0.0)))
}

/// Check that an essential matrix has numerical rank exactly two.
///
/// Degenerate samples produce rank one or full rank matrices and are rejected here.
pub fn is_valid_essential(e: &[[f64; 3]; 3]) -> bool {
    if e.iter().flatten().any(|v| !v.is_finite()) {
        return false;
    }
    let svd = linalg::svd3(&linalg::to_dmat3(e));
    let tol = svd.s.x * ESSENTIAL_RANK_TOLERANCE;
    svd.s.to_array().iter().filter(|&&s| s > tol).count() == 2
}

/// Build the essential matrix `[t]x * R`.
pub fn essential_from_rotation_translation(r: &[[f64; 3]; 3], t: &[f64; 3]) -> [[f64; 3]; 3] {
    let e = linalg::skew_symmetric(DVec3::from_array(*t)) * linalg::to_dmat3(r);
    linalg::from_dmat3(&e)
}

/// Compute the epipolar lines of both views, `l1 = F^T * x2` and `l2 = F * x1`.
pub fn epipolar_lines(
    f: &[[f64; 3]; 3],
    x1: &[[f64; 3]],
    x2: &[[f64; 3]],
) -> (Vec<[f64; 3]>, Vec<[f64; 3]>) {
    let f = linalg::to_dmat3(f);
    let ft = f.transpose();
    let l1 = x2
        .iter()
        .map(|p| (ft * DVec3::from_array(*p)).to_array())
        .collect();
    let l2 = x1
        .iter()
        .map(|p| (f * DVec3::from_array(*p)).to_array())
        .collect();
    (l1, l2)
}

/// Perpendicular distance from a 2d point to the line `a * x + b * y + c = 0`.
pub fn point_line_distance(l: &[f64; 3], p: &[f64; 3]) -> f64 {
    (l[0] * p[0] + l[1] * p[1] + l[2]).abs() / (l[0] * l[0] + l[1] * l[1]).sqrt()
}

/// Compute the epipolar errors of every correspondence.
///
/// # Returns
///
/// The distances of the points in the first view to their epipolar lines `F^T * x2`, and of
/// the points in the second view to their epipolar lines `F * x1`.
pub fn epipolar_errors(
    f: &[[f64; 3]; 3],
    x1: &[[f64; 3]],
    x2: &[[f64; 3]],
) -> (Vec<f64>, Vec<f64>) {
    let (l1, l2) = epipolar_lines(f, x1, x2);
    let d1 = l1
        .iter()
        .zip(x1.iter())
        .map(|(l, p)| point_line_distance(l, p))
        .collect();
    let d2 = l2
        .iter()
        .zip(x2.iter())
        .map(|(l, p)| point_line_distance(l, p))
        .collect();
    (d1, d2)
}

/// Classify correspondences as inliers of an essential matrix.
///
/// A correspondence is an inlier when the mean squared epipolar error
/// `(d1^2 + d2^2) / 2` is below `threshold^2`.
///
/// # Returns
///
/// The inlier fraction and the inlier mask.
pub fn essential_inliers(
    e: &[[f64; 3]; 3],
    x1: &[[f64; 3]],
    x2: &[[f64; 3]],
    threshold: f64,
) -> (f64, Vec<bool>) {
    let (d1, d2) = epipolar_errors(e, x1, x2);
    let inliers: Vec<bool> = d1
        .iter()
        .zip(d2.iter())
        .map(|(a, b)| (a * a + b * b) / 2.0 < threshold * threshold)
        .collect();
    (inlier_fraction(&inliers), inliers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::two_view_scene;
    use approx::assert_relative_eq;

    #[test]
    fn test_estimate_essential_noise_free() -> Result<(), SfmError> {
        let scene = two_view_scene(8, 1);
        let e = estimate_essential(&scene.x1, &scene.x2, true)?;
        assert_relative_eq!(e[2][2], 1.0, epsilon = 1e-12);

        let (d1, d2) = epipolar_errors(&e, &scene.x1, &scene.x2);
        for (a, b) in d1.iter().zip(d2.iter()) {
            assert!(*a < 1e-9 && *b < 1e-9);
        }

        // same matrix as [t]x R up to scale
        let e_true = essential_from_rotation_translation(&scene.r, &scene.t);
        let e_true = normalize_essential(&e_true);
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(e[i][j], e_true[i][j], epsilon = 1e-6, max_relative = 1e-6);
            }
        }
        Ok(())
    }

    #[test]
    fn test_enforce_essential_constraints_rank2() {
        let e = [[0.1, 0.4, -0.2], [0.2, -0.1, 0.5], [-0.3, 0.2, 0.3]];
        let e_fixed = enforce_essential_constraints(&e);
        let svd = linalg::svd3(&linalg::to_dmat3(&e_fixed));
        assert_relative_eq!(svd.s[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(svd.s[1], 1.0, epsilon = 1e-12);
        assert!(svd.s[2] < 1e-12);
        assert!(is_valid_essential(&e_fixed));
    }

    #[test]
    fn test_estimated_essential_singular_values() -> Result<(), SfmError> {
        // noisy correspondences still give a proper essential matrix
        let mut scene = two_view_scene(20, 3);
        for (i, p) in scene.x2.iter_mut().enumerate() {
            p[0] += 1e-3 * ((i % 3) as f64 - 1.0);
        }
        let e = estimate_essential(&scene.x1, &scene.x2, true)?;
        let svd = linalg::svd3(&linalg::to_dmat3(&e));
        assert_relative_eq!(svd.s[0], svd.s[1], max_relative = 1e-9);
        assert!(svd.s[2] < 1e-9 * svd.s[0]);
        assert!(is_valid_essential(&e));
        Ok(())
    }

    #[test]
    fn test_is_valid_essential() {
        let r = crate::test_utils::axis_angle([0.0, 1.0, 0.0], 0.3);
        let e = essential_from_rotation_translation(&r, &[1.0, 0.2, -0.1]);
        assert!(is_valid_essential(&e));

        // rank 3
        assert!(!is_valid_essential(&linalg::IDENTITY_MAT33));
        // rank 1
        assert!(!is_valid_essential(&[
            [1.0, 2.0, 3.0],
            [2.0, 4.0, 6.0],
            [-1.0, -2.0, -3.0]
        ]));
        assert!(!is_valid_essential(&[[f64::NAN; 3]; 3]));
    }

    #[test]
    fn test_epipolar_errors_offset() {
        // pure translation along x: epipolar lines are horizontal
        let e = essential_from_rotation_translation(&linalg::IDENTITY_MAT33, &[1.0, 0.0, 0.0]);
        let x1 = [[0.2, 0.1, 1.0]];
        let x2 = [[0.5, 0.13, 1.0]];
        let (d1, d2) = epipolar_errors(&e, &x1, &x2);
        assert_relative_eq!(d1[0], 0.03, epsilon = 1e-12);
        assert_relative_eq!(d2[0], 0.03, epsilon = 1e-12);

        let (epsilon, inliers) = essential_inliers(&e, &x1, &x2, 0.05);
        assert_relative_eq!(epsilon, 1.0);
        assert_eq!(inliers, vec![true]);
        let (epsilon, inliers) = essential_inliers(&e, &x1, &x2, 0.01);
        assert_relative_eq!(epsilon, 0.0);
        assert_eq!(inliers, vec![false]);
    }

    #[test]
    fn test_estimate_essential_too_few_points() {
        let scene = two_view_scene(7, 0);
        // 7 equations for 9 unknowns
        assert!(matches!(
            estimate_essential(&scene.x1, &scene.x2, false),
            Err(SfmError::InsufficientConstraints { .. })
        ));
        assert!(matches!(
            estimate_essential(&scene.x1, &scene.x2[..6], false),
            Err(SfmError::MismatchedArrayLengths { .. })
        ));
    }
}
