use glam::{DMat3, DVec3};
use serde::{Deserialize, Serialize};

use crate::error::SfmError;
use crate::linalg;

/// Pinhole calibration matrix `K`, upper-triangular with the focal lengths on the diagonal.
///
/// Used to convert between pixel and normalized image coordinates and to express pixel
/// error thresholds in normalized units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[[f64; 3]; 3]", into = "[[f64; 3]; 3]")]
pub struct Calibration {
    k: DMat3,
    k_inv: DMat3,
}

impl Calibration {
    /// Create a calibration from a row-major `K` matrix.
    ///
    /// # Errors
    ///
    /// Returns [`SfmError::InvalidCalibration`] when `K` is singular or its first focal length
    /// is not strictly positive.
    pub fn new(k: [[f64; 3]; 3]) -> Result<Self, SfmError> {
        if k[0][0] <= 0.0 || !k[0][0].is_finite() {
            return Err(SfmError::InvalidCalibration(format!(
                "focal length must be positive, got {}",
                k[0][0]
            )));
        }
        let k = linalg::to_dmat3(&k);
        let k_inv = linalg::try_inverse(&k)
            .ok_or_else(|| SfmError::InvalidCalibration("matrix is singular".to_string()))?;
        Ok(Self { k, k_inv })
    }

    /// Create a calibration from focal lengths and principal point.
    pub fn from_intrinsics(fx: f64, fy: f64, cx: f64, cy: f64) -> Result<Self, SfmError> {
        Self::new([[fx, 0.0, cx], [0.0, fy, cy], [0.0, 0.0, 1.0]])
    }

    /// The calibration matrix.
    pub fn k(&self) -> [[f64; 3]; 3] {
        linalg::from_dmat3(&self.k)
    }

    /// The inverse of the calibration matrix.
    pub fn k_inv(&self) -> [[f64; 3]; 3] {
        linalg::from_dmat3(&self.k_inv)
    }

    /// Express a pixel error threshold in normalized units, `threshold_px / K[0][0]`.
    pub fn normalized_threshold(&self, threshold_px: f64) -> f64 {
        threshold_px / self.k.x_axis.x
    }

    /// Map homogeneous pixel coordinates to normalized coordinates, `K^-1 * x`.
    pub fn normalize_points(&self, points: &[[f64; 3]]) -> Vec<[f64; 3]> {
        points
            .iter()
            .map(|p| dehomogenize(&(self.k_inv * DVec3::from_array(*p)).to_array()))
            .collect()
    }

    /// Map homogeneous normalized coordinates back to pixel coordinates, `K * x`.
    pub fn denormalize_points(&self, points: &[[f64; 3]]) -> Vec<[f64; 3]> {
        points
            .iter()
            .map(|p| dehomogenize(&(self.k * DVec3::from_array(*p)).to_array()))
            .collect()
    }

    /// Build the pixel-space camera `K * [R | t]` from a normalized camera.
    pub fn pixel_camera(&self, p: &[[f64; 4]; 3]) -> [[f64; 4]; 3] {
        let (m, t) = decompose_camera(p);
        let km = self.k * linalg::to_dmat3(&m);
        let kt = self.k * DVec3::from_array(t);
        compose_camera(&linalg::from_dmat3(&km), &kt.to_array())
    }
}

impl TryFrom<[[f64; 3]; 3]> for Calibration {
    type Error = SfmError;

    fn try_from(k: [[f64; 3]; 3]) -> Result<Self, Self::Error> {
        Self::new(k)
    }
}

impl From<Calibration> for [[f64; 3]; 3] {
    fn from(calib: Calibration) -> Self {
        calib.k()
    }
}

/// Append a unit coordinate to a 2d point.
pub fn homogenize(p: &[f64; 2]) -> [f64; 3] {
    [p[0], p[1], 1.0]
}

/// Divide a homogeneous 3-vector by its last coordinate.
///
/// Points with a zero last coordinate produce non-finite values.
pub fn dehomogenize(p: &[f64; 3]) -> [f64; 3] {
    [p[0] / p[2], p[1] / p[2], 1.0]
}

/// The canonical camera `[I | 0]`.
pub fn canonical_camera() -> [[f64; 4]; 3] {
    compose_camera(&linalg::IDENTITY_MAT33, &[0.0; 3])
}

/// Assemble the camera matrix `[R | t]`.
pub fn compose_camera(r: &[[f64; 3]; 3], t: &[f64; 3]) -> [[f64; 4]; 3] {
    [
        [r[0][0], r[0][1], r[0][2], t[0]],
        [r[1][0], r[1][1], r[1][2], t[1]],
        [r[2][0], r[2][1], r[2][2], t[2]],
    ]
}

/// Split a camera matrix into its left 3x3 block and last column.
pub fn decompose_camera(p: &[[f64; 4]; 3]) -> ([[f64; 3]; 3], [f64; 3]) {
    let m = [
        [p[0][0], p[0][1], p[0][2]],
        [p[1][0], p[1][1], p[1][2]],
        [p[2][0], p[2][1], p[2][2]],
    ];
    (m, [p[0][3], p[1][3], p[2][3]])
}

/// Assemble one camera `[R_i | t_i]` per pair of rotation and translation.
pub fn compose_cameras(
    rotations: &[[[f64; 3]; 3]],
    translations: &[[f64; 3]],
) -> Result<Vec<[[f64; 4]; 3]>, SfmError> {
    crate::error::check_same_length(
        "rotations",
        rotations.len(),
        "translations",
        translations.len(),
    )?;
    Ok(rotations
        .iter()
        .zip(translations.iter())
        .map(|(r, t)| compose_camera(r, t))
        .collect())
}

/// Compute the camera center `C = -M^-1 * p4` of a finite camera.
///
/// Returns `None` when the left 3x3 block is singular.
pub fn camera_center(p: &[[f64; 4]; 3]) -> Option<[f64; 3]> {
    let (m, p4) = decompose_camera(p);
    let m_inv = linalg::try_inverse(&linalg::to_dmat3(&m))?;
    Some((-(m_inv * DVec3::from_array(p4))).to_array())
}

/// Compute the unit principal axis `det(M) * m3` of a camera, pointing towards the scene.
pub fn principal_axis(p: &[[f64; 4]; 3]) -> [f64; 3] {
    let (m, _) = decompose_camera(p);
    let m = linalg::to_dmat3(&m);
    (m.row(2) * m.determinant()).normalize().to_array()
}

/// Project a 3d point through a camera, returning homogeneous image coordinates.
///
/// The last coordinate is the depth of the point for a normalized camera.
pub fn project_point(p: &[[f64; 4]; 3], x: &[f64; 3]) -> [f64; 3] {
    let (m, t) = decompose_camera(p);
    (linalg::to_dmat3(&m) * DVec3::from_array(*x) + DVec3::from_array(t)).to_array()
}

/// Project a set of 3d points through a camera.
///
/// # Arguments
///
/// * `p` - The camera matrix with shape (3, 4).
/// * `points` - The 3d points.
///
/// # Returns
///
/// The homogeneous image points, not dehomogenized.
pub fn project_points(p: &[[f64; 4]; 3], points: &[[f64; 3]]) -> Vec<[f64; 3]> {
    points.iter().map(|x| project_point(p, x)).collect()
}
