use crate::camera::project_point;
use crate::error::{check_same_length, SfmError};
use crate::solver::solve_homogeneous;

fn write_dlt_row(a: &mut faer::Mat<f64>, row: usize, x: f64, p3: &[f64; 4], p1: &[f64; 4]) {
    for j in 0..4 {
        a.write(row, j, p1[j] - x * p3[j]);
    }
}

/// Triangulate a single correspondence with the linear (DLT) method.
///
/// The homogeneous solution is divided by its last coordinate. A point on the plane at
/// infinity therefore comes back with non-finite coordinates; such points never pass
/// [`best_candidate_index`] nor [`feasible_points`].
pub fn triangulate_point(
    p1: &[[f64; 4]; 3],
    p2: &[[f64; 4]; 3],
    x1: &[f64; 3],
    x2: &[f64; 3],
) -> Result<[f64; 3], SfmError> {
    let mut a = faer::Mat::<f64>::zeros(4, 4);
    write_dlt_row(&mut a, 0, x1[0], &p1[2], &p1[0]);
    write_dlt_row(&mut a, 1, x1[1], &p1[2], &p1[1]);
    write_dlt_row(&mut a, 2, x2[0], &p2[2], &p2[0]);
    write_dlt_row(&mut a, 3, x2[1], &p2[2], &p2[1]);

    let xh = solve_homogeneous(a.as_ref())?;
    Ok([xh[0] / xh[3], xh[1] / xh[3], xh[2] / xh[3]])
}

/// Triangulate every correspondence seen by two cameras.
///
/// # Arguments
///
/// * `p1` - The first camera matrix.
/// * `p2` - The second camera matrix.
/// * `x1` - The homogeneous image points in the first view.
/// * `x2` - The homogeneous image points in the second view.
///
/// # Returns
///
/// One Euclidean point per correspondence, in the same order.
pub fn triangulate_points(
    p1: &[[f64; 4]; 3],
    p2: &[[f64; 4]; 3],
    x1: &[[f64; 3]],
    x2: &[[f64; 3]],
) -> Result<Vec<[f64; 3]>, SfmError> {
    check_same_length("x1", x1.len(), "x2", x2.len())?;
    x1.iter()
        .zip(x2.iter())
        .map(|(a, b)| triangulate_point(p1, p2, a, b))
        .collect()
}

/// Triangulate the correspondences once for every candidate second camera.
pub fn triangulate_candidates(
    p1: &[[f64; 4]; 3],
    candidates: &[[[f64; 4]; 3]; 4],
    x1: &[[f64; 3]],
    x2: &[[f64; 3]],
) -> Result<[Vec<[f64; 3]>; 4], SfmError> {
    Ok([
        triangulate_points(p1, &candidates[0], x1, x2)?,
        triangulate_points(p1, &candidates[1], x1, x2)?,
        triangulate_points(p1, &candidates[2], x1, x2)?,
        triangulate_points(p1, &candidates[3], x1, x2)?,
    ])
}

/// Count the finite points that project with positive depth into a camera.
pub fn count_in_front(p: &[[f64; 4]; 3], points: &[[f64; 3]]) -> usize {
    points
        .iter()
        .filter(|x| x.iter().all(|v| v.is_finite()) && project_point(p, x)[2] > 0.0)
        .count()
}

/// Index of the candidate camera whose triangulation puts the most points in front of
/// both cameras.
///
/// Ties resolve to the first candidate with the maximal count.
pub fn best_candidate_index(
    p1: &[[f64; 4]; 3],
    candidates: &[[[f64; 4]; 3]; 4],
    points: &[Vec<[f64; 3]>; 4],
) -> usize {
    let mut best_idx = 0;
    let mut best_count = 0;
    for (idx, (p2, x)) in candidates.iter().zip(points.iter()).enumerate() {
        let count = count_in_front(p1, x) + count_in_front(p2, x);
        log::trace!("candidate {idx}: {count} positive depths");
        if count > best_count {
            best_count = count;
            best_idx = idx;
        }
    }
    best_idx
}

/// Select the candidate camera and its points that satisfy cheirality best.
///
/// # Arguments
///
/// * `p1` - The first camera matrix, usually `[I | 0]`.
/// * `candidates` - The four candidate second cameras.
/// * `points` - The points triangulated with each candidate, in the same order.
///
/// # Returns
///
/// The selected second camera and its triangulated points.
pub fn select_valid_candidate(
    p1: &[[f64; 4]; 3],
    candidates: &[[[f64; 4]; 3]; 4],
    points: [Vec<[f64; 3]>; 4],
) -> ([[f64; 4]; 3], Vec<[f64; 3]>) {
    let idx = best_candidate_index(p1, candidates, &points);
    let [x0, x1, x2, x3] = points;
    let x = match idx {
        0 => x0,
        1 => x1,
        2 => x2,
        _ => x3,
    };
    (candidates[idx], x)
}

/// Linearly interpolated percentile of a non-empty set of values, `percentile` in `[0, 100]`.
fn percentile_of(values: &[f64], percentile: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (percentile / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Flag the triangulated points that are plausible scene points.
///
/// A point is kept when its distance from the centroid of the cloud is strictly below
/// the given percentile of all such distances and, with `check_cheirality`, when it has
/// positive depth in both cameras. Non-finite points are always rejected and do not
/// contribute to the centroid.
///
/// # Returns
///
/// The mask of feasible points, aligned with `points`.
pub fn feasible_points(
    p1: &[[f64; 4]; 3],
    p2: &[[f64; 4]; 3],
    points: &[[f64; 3]],
    percentile: f64,
    check_cheirality: bool,
) -> Vec<bool> {
    let finite: Vec<bool> = points
        .iter()
        .map(|x| x.iter().all(|v| v.is_finite()))
        .collect();
    let num_finite = finite.iter().filter(|&&f| f).count();
    if num_finite == 0 {
        return vec![false; points.len()];
    }

    let mut centroid = [0.0; 3];
    for x in points.iter().zip(finite.iter()).filter(|(_, &f)| f).map(|(x, _)| x) {
        for i in 0..3 {
            centroid[i] += x[i] / num_finite as f64;
        }
    }

    let distances: Vec<f64> = points
        .iter()
        .map(|x| {
            ((x[0] - centroid[0]).powi(2)
                + (x[1] - centroid[1]).powi(2)
                + (x[2] - centroid[2]).powi(2))
            .sqrt()
        })
        .collect();
    let finite_distances: Vec<f64> = distances
        .iter()
        .zip(finite.iter())
        .filter(|(_, &f)| f)
        .map(|(d, _)| *d)
        .collect();
    let cutoff = percentile_of(&finite_distances, percentile);

    points
        .iter()
        .zip(distances.iter())
        .zip(finite.iter())
        .map(|((x, d), &is_finite)| {
            if !is_finite || *d >= cutoff {
                return false;
            }
            !check_cheirality || (project_point(p1, x)[2] > 0.0 && project_point(p2, x)[2] > 0.0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{canonical_camera, compose_camera};
    use crate::essential::essential_from_rotation_translation;
    use crate::pose::extract_poses;
    use crate::test_utils::{max_abs_diff33, two_view_scene};
    use approx::assert_relative_eq;

    #[test]
    fn test_triangulate_points_roundtrip() -> Result<(), SfmError> {
        let scene = two_view_scene(50, 7);
        let p1 = canonical_camera();
        let p2 = compose_camera(&scene.r, &scene.t);
        let points = triangulate_points(&p1, &p2, &scene.x1, &scene.x2)?;
        for (x, x_true) in points.iter().zip(scene.points.iter()) {
            for i in 0..3 {
                assert_relative_eq!(x[i], x_true[i], epsilon = 1e-8);
            }
        }
        Ok(())
    }

    #[test]
    fn test_triangulate_points_mismatch() {
        let p = canonical_camera();
        let res = triangulate_points(&p, &p, &[[0.0, 0.0, 1.0]], &[]);
        assert!(matches!(res, Err(SfmError::MismatchedArrayLengths { .. })));
    }

    #[test]
    fn test_select_valid_candidate() -> Result<(), SfmError> {
        let scene = two_view_scene(30, 11);
        let e = essential_from_rotation_translation(&scene.r, &scene.t);
        let candidates = extract_poses(&e);
        let p1 = canonical_camera();

        let points = triangulate_candidates(&p1, &candidates, &scene.x1, &scene.x2)?;
        let idx = best_candidate_index(&p1, &candidates, &points);
        let (p2, x) = select_valid_candidate(&p1, &candidates, points);
        assert_eq!(p2, candidates[idx]);

        let (r, t) = crate::camera::decompose_camera(&p2);
        assert!(max_abs_diff33(&r, &scene.r) < 1e-9);
        let t_norm = glam::DVec3::from_array(scene.t).length();
        for i in 0..3 {
            assert_relative_eq!(t[i], scene.t[i] / t_norm, epsilon = 1e-9);
        }
        assert_eq!(count_in_front(&p1, &x), 30);
        assert_eq!(count_in_front(&p2, &x), 30);
        Ok(())
    }

    #[test]
    fn test_best_candidate_index_tie() {
        // no point in front of any camera: the first candidate wins
        let p1 = canonical_camera();
        let candidates = [p1; 4];
        let points = [
            vec![[0.0, 0.0, -1.0]],
            vec![[0.0, 0.0, -2.0]],
            vec![[f64::NAN; 3]],
            vec![[0.0, 0.0, -3.0]],
        ];
        assert_eq!(best_candidate_index(&p1, &candidates, &points), 0);

        let points = [
            vec![[0.0, 0.0, -1.0]],
            vec![[0.0, 0.0, 2.0]],
            vec![[0.0, 0.0, 3.0]],
            vec![[f64::INFINITY, 0.0, 1.0]],
        ];
        assert_eq!(best_candidate_index(&p1, &candidates, &points), 1);
    }

    #[test]
    fn test_feasible_points() {
        let p1 = canonical_camera();
        let p2 = compose_camera(&crate::linalg::IDENTITY_MAT33, &[-1.0, 0.0, 0.0]);
        let points = vec![
            [0.0, 0.0, 5.0],
            [0.1, 0.0, 5.0],
            [0.0, 0.1, 5.0],
            [-0.1, 0.0, 5.0],
            [0.0, 0.0, -4.0],
            [100.0, 0.0, 5.0],
            [f64::NAN, 0.0, 5.0],
        ];

        let mask = feasible_points(&p1, &p2, &points, 90.0, false);
        assert_eq!(mask, vec![true, true, true, true, true, false, false]);

        let mask = feasible_points(&p1, &p2, &points, 90.0, true);
        assert_eq!(mask, vec![true, true, true, true, false, false, false]);

        assert!(feasible_points(&p1, &p2, &[], 90.0, true).is_empty());
    }

    #[test]
    fn test_percentile_of() {
        let values = [4.0, 1.0, 3.0, 2.0];
        assert_relative_eq!(percentile_of(&values, 0.0), 1.0);
        assert_relative_eq!(percentile_of(&values, 50.0), 2.5);
        assert_relative_eq!(percentile_of(&values, 100.0), 4.0);
    }
}
