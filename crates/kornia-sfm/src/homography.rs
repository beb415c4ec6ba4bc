use glam::{DMat3, DVec3};

use crate::camera::dehomogenize;
use crate::error::{check_same_length, SfmError};
use crate::linalg;
use crate::solver::solve_homogeneous;

/// One physically valid factorization `H = R - t * n^T` of a planar homography.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanarPose {
    /// Rotation from the first to the second view.
    pub rotation: [[f64; 3]; 3],
    /// Translation direction, scaled by the inverse plane distance.
    pub translation: [f64; 3],
    /// Unit plane normal in the first view, with a non-negative third component.
    pub normal: [f64; 3],
}

/// Compute the homography matrix from point correspondences with the direct linear transform.
///
/// Each correspondence contributes two equations of `x2 ~ H * x1`, so at least four
/// non-collinear correspondences are needed.
///
/// # Arguments
///
/// * `x1` - The homogeneous source points (last coordinate 1).
/// * `x2` - The homogeneous destination points (last coordinate 1).
///
/// # Returns
///
/// The homography from `x1` to `x2` with unit Frobenius norm.
pub fn estimate_homography(
    x1: &[[f64; 3]],
    x2: &[[f64; 3]],
) -> Result<[[f64; 3]; 3], SfmError> {
    check_same_length("x1", x1.len(), "x2", x2.len())?;

    // construct matrix M
    let mut mat_m = faer::Mat::<f64>::zeros(2 * x1.len(), 9);
    for (i, (p1, p2)) in x1.iter().zip(x2.iter()).enumerate() {
        let (x, y) = (p1[0], p1[1]);
        let (u, v) = (p2[0], p2[1]);

        mat_m.write(2 * i, 0, x);
        mat_m.write(2 * i, 1, y);
        mat_m.write(2 * i, 2, 1.0);
        mat_m.write(2 * i, 6, -u * x);
        mat_m.write(2 * i, 7, -u * y);
        mat_m.write(2 * i, 8, -u);

        mat_m.write(2 * i + 1, 3, x);
        mat_m.write(2 * i + 1, 4, y);
        mat_m.write(2 * i + 1, 5, 1.0);
        mat_m.write(2 * i + 1, 6, -v * x);
        mat_m.write(2 * i + 1, 7, -v * y);
        mat_m.write(2 * i + 1, 8, -v);
    }

    let h = solve_homogeneous(mat_m.as_ref())?;

    Ok([[h[0], h[1], h[2]], [h[3], h[4], h[5]], [h[6], h[7], h[8]]])
}

/// Euclidean distance between `x2` and the dehomogenized transfer `H * x1` for every point.
pub fn homography_transfer_errors(
    h: &[[f64; 3]; 3],
    x1: &[[f64; 3]],
    x2: &[[f64; 3]],
) -> Vec<f64> {
    let h = linalg::to_dmat3(h);
    x1.iter()
        .zip(x2.iter())
        .map(|(p1, p2)| {
            let p1_proj = dehomogenize(&(h * DVec3::from_array(*p1)).to_array());
            ((p1_proj[0] - p2[0]).powi(2) + (p1_proj[1] - p2[1]).powi(2)).sqrt()
        })
        .collect()
}

fn unitize(a: f64, b: f64) -> (f64, f64) {
    let denom = 1.0 / (a * a + b * b).sqrt();
    (a * denom, b * denom)
}

/// Decompose a homography between calibrated views into two rotation, translation and
/// plane normal candidates.
///
/// The sign of `H` is fixed first: the determinant is made positive and, if most of the
/// correspondences then satisfy `x2^T * H * x1 < 0`, the matrix is negated. The two
/// solutions follow Triggs' factorization `H = R * (I - t * n^T)` and are converted to
/// `H = R - t * n^T` by rotating the translation. Each `(t, n)` pair is flipped so that
/// the normal has a non-negative third component, which leaves two ambiguous candidates.
///
/// # Arguments
///
/// * `h` - The homography between normalized coordinates.
/// * `x1` - The homogeneous points in the first view used for the sign check.
/// * `x2` - The homogeneous points in the second view used for the sign check.
pub fn decompose_homography(
    h: &[[f64; 3]; 3],
    x1: &[[f64; 3]],
    x2: &[[f64; 3]],
) -> [PlanarPose; 2] {
    let mut h = linalg::to_dmat3(h);
    if h.determinant() < 0.0 {
        h = h * -1.0;
    }

    let positives = x1
        .iter()
        .zip(x2.iter())
        .filter(|(p1, p2)| DVec3::from_array(**p2).dot(h * DVec3::from_array(**p1)) > 0.0)
        .count();
    if (positives as f64) < (x1.len() as f64) / 2.0 {
        h = h * -1.0;
    }

    let svd = linalg::svd3(&h);
    let s1 = svd.s.x / svd.s.y;
    let s3 = svd.s.z / svd.s.y;

    // clamp round-off when two singular values coincide
    let a1 = (1.0 - s3 * s3).max(0.0).sqrt();
    let b1 = (s1 * s1 - 1.0).max(0.0).sqrt();
    let (a, b) = unitize(a1, b1);
    let (c, d) = unitize(1.0 + s1 * s3, a1 * b1);
    let (e, f) = unitize(-b / s1, -a / s3);

    // first and last right singular vectors
    let v1 = svd.vt.row(0);
    let v3 = svd.vt.row(2);

    let candidate = |sign: f64| {
        let mid = DMat3::from_cols(
            DVec3::new(c, 0.0, -sign * d),
            DVec3::Y,
            DVec3::new(sign * d, 0.0, c),
        );
        let rotation = svd.u * mid * svd.vt;
        let mut normal = b * v1 - sign * a * v3;
        let mut t = e * v1 + sign * f * v3;
        if normal.z < 0.0 {
            t = -t;
            normal = -normal;
        }
        PlanarPose {
            rotation: linalg::from_dmat3(&rotation),
            translation: (rotation * t).to_array(),
            normal: normal.to_array(),
        }
    };

    [candidate(1.0), candidate(-1.0)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::essential::essential_from_rotation_translation;
    use crate::test_utils::{axis_angle, max_abs_diff33, transform};
    use approx::assert_relative_eq;

    // points on the plane z = 4 + 0.1 x seen by [I | 0] and [R | t]
    fn planar_scene() -> ([[f64; 3]; 3], [f64; 3], Vec<[f64; 3]>, Vec<[f64; 3]>) {
        let r = axis_angle([0.2, 1.0, -0.1], 0.15);
        let t = [0.5, -0.1, 0.05];
        let grid = [
            [-1.0, -0.5],
            [1.0, -0.6],
            [0.8, 0.9],
            [-0.7, 0.7],
            [0.1, 0.2],
            [0.3, -0.2],
        ];
        let mut x1 = Vec::new();
        let mut x2 = Vec::new();
        for g in grid {
            let p = [g[0], g[1], 4.0 + 0.1 * g[0]];
            x1.push(dehomogenize(&p));
            x2.push(dehomogenize(&transform(&r, &t, &p)));
        }
        (r, t, x1, x2)
    }

    #[test]
    fn test_estimate_homography_identity() -> Result<(), SfmError> {
        let x1 = [
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 1.0],
            [0.0, 1.0, 1.0],
            [1.0, 1.0, 1.0],
        ];
        let h = estimate_homography(&x1, &x1)?;
        let h = linalg::to_dmat3(&h);
        let h = h * (1.0 / h.z_axis.z);
        assert!(h.abs_diff_eq(DMat3::IDENTITY, 1e-9));
        Ok(())
    }

    #[test]
    fn test_estimate_homography_transfer() -> Result<(), SfmError> {
        let (_, _, x1, x2) = planar_scene();
        let h = estimate_homography(&x1[..4], &x2[..4])?;
        for err in homography_transfer_errors(&h, &x1, &x2) {
            assert!(err < 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_estimate_homography_too_few_points() {
        let x = [[0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [0.0, 1.0, 1.0]];
        assert!(matches!(
            estimate_homography(&x, &x),
            Err(SfmError::InsufficientConstraints { .. })
        ));
    }

    #[test]
    fn test_decompose_homography_recovers_pose() -> Result<(), SfmError> {
        let (r, t, x1, x2) = planar_scene();
        let h = estimate_homography(&x1[..4], &x2[..4])?;
        let candidates = decompose_homography(&h, &x1, &x2);

        let mut found = false;
        for cand in candidates.iter() {
            let rotation = linalg::to_dmat3(&cand.rotation);
            assert_relative_eq!(rotation.determinant(), 1.0, epsilon = 1e-9);
            assert!(cand.normal[2] >= 0.0);

            // both candidates explain the correspondences
            let e = linalg::to_dmat3(&essential_from_rotation_translation(
                &cand.rotation,
                &cand.translation,
            ));
            for (p1, p2) in x1.iter().zip(x2.iter()) {
                let residual = DVec3::from_array(*p2).dot(e * DVec3::from_array(*p1));
                assert!(residual.abs() < 1e-9);
            }

            let r_diff = max_abs_diff33(&cand.rotation, &r);
            let cos_t = DVec3::from_array(cand.translation)
                .normalize()
                .dot(DVec3::from_array(t).normalize());
            if r_diff < 1e-9 && (cos_t.abs() - 1.0).abs() < 1e-9 {
                found = true;
            }
        }
        assert!(found);
        Ok(())
    }

    #[test]
    fn test_decompose_homography_sign_invariant() -> Result<(), SfmError> {
        let (_, _, x1, x2) = planar_scene();
        let h = estimate_homography(&x1[..4], &x2[..4])?;
        let a = decompose_homography(&h, &x1, &x2);
        let b = decompose_homography(&h.map(|row| row.map(|v| -3.0 * v)), &x1, &x2);
        // the singular vectors may come out with other signs, so match candidates as a set
        let same = |p: &PlanarPose, q: &PlanarPose| {
            (0..3).all(|i| {
                (p.normal[i] - q.normal[i]).abs() < 1e-9
                    && (0..3).all(|j| (p.rotation[i][j] - q.rotation[i][j]).abs() < 1e-9)
            })
        };
        for ca in a.iter() {
            assert!(b.iter().any(|cb| same(ca, cb)));
        }
        Ok(())
    }
}
