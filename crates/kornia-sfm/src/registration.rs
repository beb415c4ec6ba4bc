use glam::{DMat3, DVec3};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::camera::{dehomogenize, Calibration};
use crate::error::{check_min_len, check_same_length, SfmError};
use crate::linalg;
use crate::ransac::{gather, inlier_fraction, sample_indices, BestModel, RansacParams};
use crate::solver::solve_homogeneous;

/// Sample size of the translation solvers.
pub const TRANSLATION_SAMPLE_SIZE: usize = 2;

/// Linear solver used for the camera translation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranslationSolver {
    /// Solve `x ~ R * X + t` by applying the rotation to the points first and then solving
    /// for `t` on the rotated points `R * X`, two equations per correspondence.
    Dlt1,
    /// Solve `[x]x * (R * X + t) = 0`, three equations per correspondence.
    #[default]
    Dlt2,
}

impl TranslationSolver {
    /// Estimate the translation from a set of correspondences.
    pub fn estimate(
        &self,
        r: &[[f64; 3]; 3],
        points: &[[f64; 3]],
        x: &[[f64; 3]],
    ) -> Result<[f64; 3], SfmError> {
        match self {
            TranslationSolver::Dlt1 => {
                let r = linalg::to_dmat3(r);
                let rotated: Vec<[f64; 3]> = points
                    .iter()
                    .map(|p| (r * DVec3::from_array(*p)).to_array())
                    .collect();
                estimate_translation_dlt1(&rotated, x)
            }
            TranslationSolver::Dlt2 => estimate_translation_dlt2(r, points, x),
        }
    }
}

fn dehomogenize_solution(v: &[f64]) -> [f64; 3] {
    [v[0] / v[3], v[1] / v[3], v[2] / v[3]]
}

/// Estimate the camera translation from points already expressed in the camera orientation.
///
/// With `Y = R * X` the projection `x ~ Y + t` gives the equations
/// `t_x - x * t_z + Y_x - x * Y_z = 0` and `t_y - y * t_z + Y_y - y * Y_z = 0`
/// in the homogeneous unknown `(t, 1)`.
///
/// # Arguments
///
/// * `rotated_points` - The 3d points rotated into the camera orientation.
/// * `x` - The homogeneous normalized observations.
pub fn estimate_translation_dlt1(
    rotated_points: &[[f64; 3]],
    x: &[[f64; 3]],
) -> Result<[f64; 3], SfmError> {
    check_same_length("points", rotated_points.len(), "x", x.len())?;

    let mut mat_m = faer::Mat::<f64>::zeros(2 * x.len(), 4);
    for (i, (y, p)) in rotated_points.iter().zip(x.iter()).enumerate() {
        mat_m.write(2 * i, 0, 1.0);
        mat_m.write(2 * i, 2, -p[0]);
        mat_m.write(2 * i, 3, y[0] - p[0] * y[2]);

        mat_m.write(2 * i + 1, 1, 1.0);
        mat_m.write(2 * i + 1, 2, -p[1]);
        mat_m.write(2 * i + 1, 3, y[1] - p[1] * y[2]);
    }

    let v = solve_homogeneous(mat_m.as_ref())?;
    Ok(dehomogenize_solution(&v))
}

/// Estimate the camera translation with the cross-product constraint `[x]x * (R * X + t) = 0`.
///
/// Each correspondence contributes the three rows `[ [x]x | [x]x * R * X ]` in the
/// homogeneous unknown `(t, 1)`.
pub fn estimate_translation_dlt2(
    r: &[[f64; 3]; 3],
    points: &[[f64; 3]],
    x: &[[f64; 3]],
) -> Result<[f64; 3], SfmError> {
    check_same_length("points", points.len(), "x", x.len())?;

    let r = linalg::to_dmat3(r);
    let mut mat_m = faer::Mat::<f64>::zeros(3 * x.len(), 4);
    for (i, (pt, p)) in points.iter().zip(x.iter()).enumerate() {
        let xx = linalg::skew_symmetric(DVec3::from_array(*p));
        let rhs = xx * (r * DVec3::from_array(*pt));
        for row in 0..3 {
            for col in 0..3 {
                mat_m.write(3 * i + row, col, xx.col(col)[row]);
            }
            mat_m.write(3 * i + row, 3, rhs[row]);
        }
    }

    let v = solve_homogeneous(mat_m.as_ref())?;
    Ok(dehomogenize_solution(&v))
}

/// Euclidean distances between the observations and the projections of `R * X + t`.
pub fn reprojection_distances(
    r: &[[f64; 3]; 3],
    t: &[f64; 3],
    points: &[[f64; 3]],
    x: &[[f64; 3]],
) -> Vec<f64> {
    let (r, t) = (linalg::to_dmat3(r), DVec3::from_array(*t));
    points
        .iter()
        .zip(x.iter())
        .map(|(pt, p)| {
            let proj = dehomogenize(&(r * DVec3::from_array(*pt) + t).to_array());
            ((proj[0] - p[0]).powi(2) + (proj[1] - p[1]).powi(2)).sqrt()
        })
        .collect()
}

/// Result of the robust translation registration.
#[derive(Clone, Debug)]
pub struct TranslationRansacResult {
    /// Best translation, all NaN when no hypothesis had any inlier.
    pub translation: [f64; 3],
    /// Inlier mask of the best translation, all false when none was found.
    pub inliers: Vec<bool>,
    /// Inlier fraction of the best translation.
    pub inlier_ratio: f64,
    /// Number of iterations run before the budget was exhausted.
    pub iterations: usize,
}

impl TranslationRansacResult {
    /// Whether a translation was found.
    pub fn is_found(&self) -> bool {
        self.translation.iter().all(|v| v.is_finite())
    }
}

/// Robustly estimate the translation of a camera with known rotation.
///
/// See [`estimate_translation_ransac_with_rng`]. The random generator is created from
/// `params.random_seed`.
pub fn estimate_translation_ransac(
    calibration: &Calibration,
    r: &[[f64; 3]; 3],
    points: &[[f64; 3]],
    x: &[[f64; 3]],
    params: &RansacParams,
    solver: TranslationSolver,
) -> Result<TranslationRansacResult, SfmError> {
    let mut rng = params.rng();
    estimate_translation_ransac_with_rng(calibration, r, points, x, params, solver, &mut rng)
}

/// Robustly estimate the translation of a camera with known rotation.
///
/// Draws two correspondences per iteration, solves for the translation with `solver` and
/// counts the observations whose reprojection lies closer than the normalized threshold.
/// A strictly larger inlier fraction replaces the best translation and shrinks the budget.
///
/// # Arguments
///
/// * `calibration` - The calibration of the camera, used to scale the pixel threshold.
/// * `r` - The known rotation of the camera.
/// * `points` - The known 3d points.
/// * `x` - The homogeneous normalized observations of `points` in the new camera.
/// * `params` - The RANSAC parameters.
/// * `solver` - The linear translation solver.
/// * `rng` - The random generator used for sampling.
pub fn estimate_translation_ransac_with_rng<R: Rng + ?Sized>(
    calibration: &Calibration,
    r: &[[f64; 3]; 3],
    points: &[[f64; 3]],
    x: &[[f64; 3]],
    params: &RansacParams,
    solver: TranslationSolver,
    rng: &mut R,
) -> Result<TranslationRansacResult, SfmError> {
    check_same_length("points", points.len(), "x", x.len())?;
    check_min_len(TRANSLATION_SAMPLE_SIZE, x.len())?;

    let n = x.len();
    let threshold = calibration.normalized_threshold(params.threshold_px);
    let mut best = BestModel::new(n, params.max_iterations);

    let mut t = 0;
    while t < best.budget {
        t += 1;

        let sample = sample_indices(rng, n, TRANSLATION_SAMPLE_SIZE);
        let (points_s, x_s) = (gather(points, &sample), gather(x, &sample));
        let Ok(translation) = solver.estimate(r, &points_s, &x_s) else {
            continue;
        };

        let inliers: Vec<bool> = reprojection_distances(r, &translation, points, x)
            .iter()
            .map(|&d| d < threshold)
            .collect();
        let epsilon = inlier_fraction(&inliers);
        if best.update(translation, inliers, epsilon, |eps| {
            params.iterations(eps, TRANSLATION_SAMPLE_SIZE)
        }) {
            log::debug!(
                "iteration {t}: T {} epsilon {epsilon:.2} with {solver:?}",
                best.budget
            );
        }
    }

    log::debug!("bailout at iteration {t}");
    if best.model.is_none() {
        log::warn!("no translation found after {t} iterations");
    }

    Ok(TranslationRansacResult {
        translation: best.model.unwrap_or([f64::NAN; 3]),
        inliers: best.inliers,
        inlier_ratio: best.score,
        iterations: t,
    })
}

/// Parameters controlling the Levenberg-Marquardt translation refinement.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineParams {
    /// Maximum number of LM iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the relative cost decrease.
    pub cost_tolerance: f64,
    /// Initial damping factor (lambda).
    pub initial_lambda: f64,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            cost_tolerance: 1e-10,
            initial_lambda: 1e-3,
        }
    }
}

impl RefineParams {
    /// Set maximum iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set cost tolerance.
    pub fn with_cost_tolerance(mut self, cost_tolerance: f64) -> Self {
        self.cost_tolerance = cost_tolerance;
        self
    }

    /// Set initial lambda.
    pub fn with_initial_lambda(mut self, initial_lambda: f64) -> Self {
        self.initial_lambda = initial_lambda;
        self
    }
}

/// Outcome of [`refine_translation`].
#[derive(Clone, Copy, Debug)]
pub struct TranslationRefinement {
    /// The refined translation.
    pub translation: [f64; 3],
    /// Sum of squared normalized reprojection errors before refinement.
    pub initial_cost: f64,
    /// Sum of squared normalized reprojection errors after refinement.
    pub final_cost: f64,
    /// Number of LM iterations run.
    pub iterations: usize,
    /// Whether the cost tolerance was reached.
    pub converged: bool,
}

// sum of squared residuals, None when a point is not in front of the camera
fn reprojection_cost(rotated: &[DVec3], x: &[[f64; 3]], t: DVec3) -> Option<f64> {
    let mut cost = 0.0;
    for (y, p) in rotated.iter().zip(x.iter()) {
        let c = *y + t;
        if c.z <= f64::EPSILON {
            return None;
        }
        let du = c.x / c.z - p[0];
        let dv = c.y / c.z - p[1];
        cost += du * du + dv * dv;
    }
    Some(cost)
}

// a * b^T
fn outer(a: DVec3, b: DVec3) -> DMat3 {
    DMat3::from_cols(a * b.x, a * b.y, a * b.z)
}

/// Refine a camera translation by minimizing the reprojection error of the inliers.
///
/// The rotation stays fixed. The residual of every inlier is the difference between its
/// normalized observation and the projection of `R * X + t`, and the Jacobian with respect
/// to `t` is computed analytically.
///
/// # Arguments
///
/// * `r` - The known rotation of the camera.
/// * `t` - The initial translation, e.g. from [`estimate_translation_ransac`].
/// * `points` - The known 3d points.
/// * `x` - The homogeneous normalized observations.
/// * `inliers` - The correspondences taking part in the refinement.
/// * `params` - The LM parameters.
pub fn refine_translation(
    r: &[[f64; 3]; 3],
    t: &[f64; 3],
    points: &[[f64; 3]],
    x: &[[f64; 3]],
    inliers: &[bool],
    params: &RefineParams,
) -> Result<TranslationRefinement, SfmError> {
    check_same_length("points", points.len(), "x", x.len())?;
    check_same_length("points", points.len(), "inliers", inliers.len())?;

    let r = linalg::to_dmat3(r);
    let (rotated, obs): (Vec<DVec3>, Vec<[f64; 3]>) = points
        .iter()
        .zip(x.iter())
        .zip(inliers.iter())
        .filter(|(_, &m)| m)
        .map(|((pt, p), _)| (r * DVec3::from_array(*pt), *p))
        .unzip();
    check_min_len(TRANSLATION_SAMPLE_SIZE, rotated.len())?;

    let mut t = DVec3::from_array(*t);
    let Some(initial_cost) = reprojection_cost(&rotated, &obs, t) else {
        log::warn!("initial translation puts inliers behind the camera, skipping refinement");
        return Ok(TranslationRefinement {
            translation: t.to_array(),
            initial_cost: f64::INFINITY,
            final_cost: f64::INFINITY,
            iterations: 0,
            converged: false,
        });
    };

    let mut cost = initial_cost;
    let mut lambda = params.initial_lambda;
    let mut converged = false;
    let mut iterations = 0;

    while iterations < params.max_iterations {
        iterations += 1;

        // normal equations J^T J and J^T r
        let mut jtj = DMat3::ZERO;
        let mut jtr = DVec3::ZERO;
        for (y, p) in rotated.iter().zip(obs.iter()) {
            let c = *y + t;
            let (u, v) = (c.x / c.z, c.y / c.z);
            let ju = DVec3::new(1.0 / c.z, 0.0, -u / c.z);
            let jv = DVec3::new(0.0, 1.0 / c.z, -v / c.z);
            jtr += ju * (u - p[0]) + jv * (v - p[1]);
            jtj = jtj + outer(ju, ju) + outer(jv, jv);
        }

        let diag = DVec3::new(jtj.x_axis.x, jtj.y_axis.y, jtj.z_axis.z)
            .max(DVec3::splat(f64::EPSILON));
        let damped = jtj + DMat3::from_diagonal(diag * lambda);
        let Some(damped_inv) = linalg::try_inverse(&damped) else {
            log::debug!("singular normal equations at iteration {iterations}");
            break;
        };
        let candidate = t - damped_inv * jtr;

        match reprojection_cost(&rotated, &obs, candidate) {
            Some(new_cost) if new_cost < cost => {
                let decrease = (cost - new_cost) / cost.max(f64::EPSILON);
                t = candidate;
                cost = new_cost;
                lambda /= 10.0;
                if decrease < params.cost_tolerance {
                    converged = true;
                    break;
                }
            }
            _ => {
                lambda *= 10.0;
            }
        }

        if cost <= f64::EPSILON * f64::EPSILON {
            converged = true;
            break;
        }
    }

    log::debug!(
        "translation refinement: cost {initial_cost:e} -> {cost:e} in {iterations} iterations"
    );

    Ok(TranslationRefinement {
        translation: t.to_array(),
        initial_cost,
        final_cost: cost,
        iterations,
        converged,
    })
}
