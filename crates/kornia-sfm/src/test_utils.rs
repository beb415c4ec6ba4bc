use glam::{DMat3, DVec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::camera::dehomogenize;
use crate::linalg;

pub(crate) fn axis_angle(axis: [f64; 3], angle: f64) -> [[f64; 3]; 3] {
    let axis = DVec3::from_array(axis).normalize();
    linalg::from_dmat3(&DMat3::from_axis_angle(axis, angle))
}

pub(crate) fn transform(r: &[[f64; 3]; 3], t: &[f64; 3], p: &[f64; 3]) -> [f64; 3] {
    (linalg::to_dmat3(r) * DVec3::from_array(*p) + DVec3::from_array(*t)).to_array()
}

/// Two normalized cameras `[I | 0]` and `[R | t]` observing a random point cloud.
pub(crate) struct TwoViewScene {
    pub r: [[f64; 3]; 3],
    pub t: [f64; 3],
    pub points: Vec<[f64; 3]>,
    pub x1: Vec<[f64; 3]>,
    pub x2: Vec<[f64; 3]>,
}

pub(crate) fn two_view_scene(n: usize, seed: u64) -> TwoViewScene {
    let mut rng = StdRng::seed_from_u64(seed);
    let r = axis_angle([0.1, 1.0, 0.2], 0.2);
    let t = [-1.0, 0.1, 0.2];

    let points: Vec<[f64; 3]> = (0..n)
        .map(|_| {
            [
                rng.random_range(-2.0..2.0),
                rng.random_range(-2.0..2.0),
                rng.random_range(4.0..8.0),
            ]
        })
        .collect();
    let x1 = points.iter().map(dehomogenize).collect();
    let x2 = points
        .iter()
        .map(|p| dehomogenize(&transform(&r, &t, p)))
        .collect();

    TwoViewScene {
        r,
        t,
        points,
        x1,
        x2,
    }
}

/// Replace the first `num_outliers` points of `x` with uniform noise and return the true mask.
pub(crate) fn corrupt(x: &mut [[f64; 3]], num_outliers: usize, seed: u64) -> Vec<bool> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut mask = vec![true; x.len()];
    for (p, m) in x.iter_mut().zip(mask.iter_mut()).take(num_outliers) {
        *p = [rng.random_range(-0.6..0.6), rng.random_range(-0.6..0.6), 1.0];
        *m = false;
    }
    mask
}

pub(crate) fn max_abs_diff33(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3]) -> f64 {
    (linalg::to_dmat3(a) - linalg::to_dmat3(b))
        .to_cols_array()
        .into_iter()
        .map(f64::abs)
        .fold(0.0, f64::max)
}
