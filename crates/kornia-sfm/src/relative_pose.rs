use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::camera::{canonical_camera, decompose_camera, Calibration};
use crate::error::{check_min_len, check_same_length, SfmError};
use crate::essential::{
    essential_from_rotation_translation, essential_inliers, estimate_essential, is_valid_essential,
    normalize_essential,
};
use crate::homography::{decompose_homography, estimate_homography, homography_transfer_errors};
use crate::pose::extract_poses;
use crate::ransac::{gather, inlier_fraction, sample_indices, BestModel, RansacParams};
use crate::triangulation::{select_valid_candidate, triangulate_candidates};

/// Sample size of the 8-point essential matrix solver.
pub const ESSENTIAL_SAMPLE_SIZE: usize = 8;

/// Sample size of the 4-point homography solver.
pub const HOMOGRAPHY_SAMPLE_SIZE: usize = 4;

/// Homography inliers use this multiple of the essential matrix threshold.
pub const HOMOGRAPHY_THRESHOLD_FACTOR: f64 = 3.0;

/// Minimal solvers used to generate essential matrix hypotheses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelativePoseModels {
    /// Draw 8-point samples and estimate the essential matrix directly.
    pub essential: bool,
    /// Draw 4-point samples, estimate a homography and decompose it into essential matrices.
    pub homography: bool,
}

impl Default for RelativePoseModels {
    fn default() -> Self {
        Self {
            essential: true,
            homography: true,
        }
    }
}

impl RelativePoseModels {
    /// Smallest number of correspondences the enabled solvers can sample from.
    pub fn required_correspondences(&self) -> usize {
        match (self.essential, self.homography) {
            (true, _) => ESSENTIAL_SAMPLE_SIZE,
            (false, true) => HOMOGRAPHY_SAMPLE_SIZE,
            (false, false) => 0,
        }
    }
}

/// Result of the robust essential matrix estimation.
#[derive(Clone, Debug)]
pub struct EssentialRansacResult {
    /// Best essential matrix, `None` when no valid hypothesis was found.
    pub essential: Option<[[f64; 3]; 3]>,
    /// Inlier mask of the best essential matrix, all false when none was found.
    pub inliers: Vec<bool>,
    /// Inlier fraction of the best essential matrix.
    pub inlier_ratio: f64,
    /// Number of iterations run before the budget was exhausted.
    pub iterations: usize,
}

/// Estimate the essential matrix between two views with an adaptive dual-model RANSAC.
///
/// See [`estimate_essential_ransac_with_rng`]. The random generator is created from
/// `params.random_seed`.
pub fn estimate_essential_ransac(
    calibration: &Calibration,
    x1: &[[f64; 3]],
    x2: &[[f64; 3]],
    params: &RansacParams,
    models: &RelativePoseModels,
) -> Result<EssentialRansacResult, SfmError> {
    let mut rng = params.rng();
    estimate_essential_ransac_with_rng(calibration, x1, x2, params, models, &mut rng)
}

/// Estimate the essential matrix between two views with an adaptive dual-model RANSAC.
///
/// Every iteration draws an 8-point sample for a direct essential matrix hypothesis and
/// a 4-point sample for a homography. A homography that beats the best homography inlier
/// fraction so far is decomposed and each of its two poses becomes an essential matrix
/// hypothesis `[t]x * R`. Hypotheses are scored by their epipolar inlier fraction and only
/// a strictly better one replaces the current best. The loop stops once the iteration
/// counter reaches either the essential budget or the homography budget, both starting
/// at `params.max_iterations` and shrinking with [`RansacParams::iterations`].
///
/// # Arguments
///
/// * `calibration` - The calibration of the views, used to scale the pixel threshold.
/// * `x1` - The homogeneous normalized points in the first view.
/// * `x2` - The homogeneous normalized points in the second view.
/// * `params` - The RANSAC parameters.
/// * `models` - The enabled hypothesis generators.
/// * `rng` - The random generator used for sampling.
///
/// # Errors
///
/// Returns an error when the point sets differ in length or are too small to sample from.
/// Running out of iterations without a valid model is not an error.
pub fn estimate_essential_ransac_with_rng<R: Rng + ?Sized>(
    calibration: &Calibration,
    x1: &[[f64; 3]],
    x2: &[[f64; 3]],
    params: &RansacParams,
    models: &RelativePoseModels,
    rng: &mut R,
) -> Result<EssentialRansacResult, SfmError> {
    check_same_length("x1", x1.len(), "x2", x2.len())?;
    check_min_len(models.required_correspondences(), x1.len())?;

    let n = x1.len();
    let threshold = calibration.normalized_threshold(params.threshold_px);
    let threshold_h = HOMOGRAPHY_THRESHOLD_FACTOR * threshold;

    let mut best = BestModel::new(n, params.max_iterations);
    let mut best_epsilon_h = 0.0;
    let mut budget_h = params.max_iterations;

    if !models.essential && !models.homography {
        log::warn!("no relative pose model enabled");
        return Ok(EssentialRansacResult {
            essential: None,
            inliers: best.inliers,
            inlier_ratio: 0.0,
            iterations: 0,
        });
    }

    let mut t = 0;
    while t < best.budget && t < budget_h {
        t += 1;

        if models.essential {
            let sample = sample_indices(rng, n, ESSENTIAL_SAMPLE_SIZE);
            if let Ok(e) = estimate_essential(&gather(x1, &sample), &gather(x2, &sample), true) {
                if is_valid_essential(&e) {
                    let (epsilon, inliers) = essential_inliers(&e, x1, x2, threshold);
                    if best.update(e, inliers, epsilon, |eps| {
                        params.iterations(eps, ESSENTIAL_SAMPLE_SIZE)
                    }) {
                        log::debug!(
                            "iteration {t}: T_E {} T_H {budget_h} epsilon_E {epsilon:.2} epsilon_H {best_epsilon_h:.2} from E 8-point",
                            best.budget
                        );
                    }
                }
            }
        }

        if models.homography {
            let sample = sample_indices(rng, n, HOMOGRAPHY_SAMPLE_SIZE);
            let Ok(h) = estimate_homography(&gather(x1, &sample), &gather(x2, &sample)) else {
                continue;
            };
            let inliers_h: Vec<bool> = homography_transfer_errors(&h, x1, x2)
                .iter()
                .map(|&d| d < threshold_h)
                .collect();
            let epsilon_h = inlier_fraction(&inliers_h);
            if epsilon_h <= best_epsilon_h {
                continue;
            }

            for pose in decompose_homography(&h, x1, x2) {
                let e = essential_from_rotation_translation(&pose.rotation, &pose.translation);
                if !is_valid_essential(&e) {
                    continue;
                }
                let e = normalize_essential(&e);
                let (epsilon, inliers) = essential_inliers(&e, x1, x2, threshold);
                if best.update(e, inliers, epsilon, |eps| {
                    params.iterations(eps, ESSENTIAL_SAMPLE_SIZE)
                }) {
                    best_epsilon_h = epsilon_h;
                    budget_h = params.iterations(epsilon_h, HOMOGRAPHY_SAMPLE_SIZE);
                    log::debug!(
                        "iteration {t}: T_E {} T_H {budget_h} epsilon_E {epsilon:.2} epsilon_H {best_epsilon_h:.2} from H 4-point",
                        best.budget
                    );
                }
            }
        }
    }

    log::debug!("bailout at iteration {t}");
    if best.model.is_none() {
        log::warn!("no valid essential matrix found after {t} iterations");
    }

    Ok(EssentialRansacResult {
        essential: best.model,
        inliers: best.inliers,
        inlier_ratio: best.score,
        iterations: t,
    })
}

/// Relative pose of the second view with respect to the first, `x2 ~ [R | t] * X`.
#[derive(Clone, Debug)]
pub struct RelativePose {
    /// The essential matrix the pose was extracted from.
    pub essential: [[f64; 3]; 3],
    /// Rotation from the first to the second view.
    pub rotation: [[f64; 3]; 3],
    /// Unit translation from the first to the second view.
    pub translation: [f64; 3],
    /// The normalized camera `[R | t]` of the second view.
    pub camera: [[f64; 4]; 3],
    /// Inlier mask over the input correspondences.
    pub inliers: Vec<bool>,
    /// Triangulated inlier points, in the order of the inliers.
    pub points: Vec<[f64; 3]>,
}

/// Recover the relative pose and the inlier structure of two calibrated views.
///
/// See [`estimate_relative_pose_with_rng`].
pub fn estimate_relative_pose(
    calibration: &Calibration,
    x1: &[[f64; 3]],
    x2: &[[f64; 3]],
    params: &RansacParams,
    models: &RelativePoseModels,
) -> Result<Option<RelativePose>, SfmError> {
    let mut rng = params.rng();
    estimate_relative_pose_with_rng(calibration, x1, x2, params, models, &mut rng)
}

/// Recover the relative pose and the inlier structure of two calibrated views.
///
/// Runs [`estimate_essential_ransac_with_rng`], extracts the four candidate cameras,
/// triangulates the inliers with each of them against `[I | 0]` and keeps the candidate
/// with the most points in front of both cameras.
///
/// # Returns
///
/// `None` when RANSAC did not find a valid essential matrix.
pub fn estimate_relative_pose_with_rng<R: Rng + ?Sized>(
    calibration: &Calibration,
    x1: &[[f64; 3]],
    x2: &[[f64; 3]],
    params: &RansacParams,
    models: &RelativePoseModels,
    rng: &mut R,
) -> Result<Option<RelativePose>, SfmError> {
    let result = estimate_essential_ransac_with_rng(calibration, x1, x2, params, models, rng)?;
    let Some(essential) = result.essential else {
        return Ok(None);
    };

    let (x1_in, x2_in): (Vec<[f64; 3]>, Vec<[f64; 3]>) = x1
        .iter()
        .zip(x2.iter())
        .zip(result.inliers.iter())
        .filter(|(_, &m)| m)
        .map(|((a, b), _)| (*a, *b))
        .unzip();

    let p1 = canonical_camera();
    let candidates = extract_poses(&essential);
    let points = triangulate_candidates(&p1, &candidates, &x1_in, &x2_in)?;
    let (camera, points) = select_valid_candidate(&p1, &candidates, points);
    let (rotation, translation) = decompose_camera(&camera);

    Ok(Some(RelativePose {
        essential,
        rotation,
        translation,
        camera,
        inliers: result.inliers,
        points,
    }))
}
