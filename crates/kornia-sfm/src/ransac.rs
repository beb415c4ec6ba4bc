use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Parameters shared by the RANSAC estimators.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    /// Lower bound of the adaptive iteration budget.
    pub min_iterations: usize,
    /// Upper bound of the adaptive iteration budget, also the initial budget.
    pub max_iterations: usize,
    /// Multiplier applied to the theoretical iteration count.
    pub iteration_scale: f64,
    /// Desired probability that at least one sample is outlier-free.
    pub confidence: f64,
    /// Inlier threshold in pixels.
    pub threshold_px: f64,
    /// Optional RNG seed for deterministic runs.
    pub random_seed: Option<u64>,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            min_iterations: 10,
            max_iterations: 10000,
            iteration_scale: 1.0,
            confidence: 0.99,
            threshold_px: 1.0,
            random_seed: Some(0),
        }
    }
}

impl RansacParams {
    /// Set the bounds of the iteration budget.
    pub fn with_iterations(mut self, min_iterations: usize, max_iterations: usize) -> Self {
        self.min_iterations = min_iterations;
        self.max_iterations = max_iterations;
        self
    }

    /// Set the iteration scale factor.
    pub fn with_iteration_scale(mut self, iteration_scale: f64) -> Self {
        self.iteration_scale = iteration_scale;
        self
    }

    /// Set the confidence.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Set the inlier threshold in pixels.
    pub fn with_threshold_px(mut self, threshold_px: f64) -> Self {
        self.threshold_px = threshold_px;
        self
    }

    /// Set or clear the RNG seed.
    pub fn with_random_seed(mut self, random_seed: Option<u64>) -> Self {
        self.random_seed = random_seed;
        self
    }

    /// Adaptive budget for the given inlier fraction and sample size.
    pub fn iterations(&self, epsilon: f64, sample_size: usize) -> usize {
        ransac_iterations(
            self.confidence,
            epsilon,
            sample_size,
            self.min_iterations,
            self.max_iterations,
            self.iteration_scale,
        )
    }

    /// Create the random generator described by `random_seed`.
    pub fn rng(&self) -> StdRng {
        match self.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => {
                let mut tr = rand::rng();
                StdRng::from_rng(&mut tr)
            }
        }
    }
}

/// Number of iterations needed to draw an outlier-free sample with probability `alpha`.
///
/// Computes `scale * ceil(log(1 - alpha) / log(1 - epsilon^s))` rounded up to a whole count.
/// A non-finite result or one above `max_its` gives `max_its`, a result below `min_its` gives
/// `min_its`.
///
/// # Arguments
///
/// * `alpha` - The desired confidence.
/// * `epsilon` - The inlier fraction of the current best model.
/// * `s` - The sample size of the minimal solver.
/// * `min_its` - The lower bound.
/// * `max_its` - The upper bound.
/// * `scale` - The multiplier applied to the theoretical count.
///
/// Example:
///
/// ```
/// use kornia_sfm::ransac::ransac_iterations;
///
/// assert_eq!(ransac_iterations(0.99, 0.0, 8, 10, 1000, 1.0), 1000);
/// assert_eq!(ransac_iterations(0.99, 1.0, 8, 10, 1000, 1.0), 10);
/// assert_eq!(ransac_iterations(0.99, 0.5, 2, 1, 1000, 1.0), 17);
/// ```
pub fn ransac_iterations(
    alpha: f64,
    epsilon: f64,
    s: usize,
    min_its: usize,
    max_its: usize,
    scale: f64,
) -> usize {
    let exponent = i32::try_from(s).unwrap_or(i32::MAX);
    let its = scale * ((1.0 - alpha).ln() / (1.0 - epsilon.powi(exponent)).ln()).ceil();
    if !its.is_finite() || its > max_its as f64 {
        max_its
    } else if its < min_its as f64 {
        min_its
    } else {
        its.ceil() as usize
    }
}

/// Draw `amount` distinct indices out of `0..length`.
pub(crate) fn sample_indices<R: Rng + ?Sized>(
    rng: &mut R,
    length: usize,
    amount: usize,
) -> Vec<usize> {
    rand::seq::index::sample(rng, length, amount).into_vec()
}

/// Gather the entries of `points` at `indices`.
pub(crate) fn gather<T: Copy>(points: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| points[i]).collect()
}

/// Fraction of `true` entries in a mask, zero for an empty mask.
pub(crate) fn inlier_fraction(mask: &[bool]) -> f64 {
    if mask.is_empty() {
        return 0.0;
    }
    mask.iter().filter(|&&m| m).count() as f64 / mask.len() as f64
}

/// Best-so-far accumulator of a RANSAC loop.
///
/// The model, mask, score and budget only change together, on a strictly better score.
#[derive(Clone, Debug)]
pub(crate) struct BestModel<M> {
    pub model: Option<M>,
    pub inliers: Vec<bool>,
    pub score: f64,
    pub budget: usize,
}

impl<M> BestModel<M> {
    /// Empty accumulator with an all-false mask of length `n`.
    pub fn new(n: usize, budget: usize) -> Self {
        Self {
            model: None,
            inliers: vec![false; n],
            score: 0.0,
            budget,
        }
    }

    /// Adopt the candidate if `score` is strictly better, returning whether it was adopted.
    pub fn update(
        &mut self,
        model: M,
        inliers: Vec<bool>,
        score: f64,
        budget: impl FnOnce(f64) -> usize,
    ) -> bool {
        if score <= self.score {
            return false;
        }
        self.model = Some(model);
        self.inliers = inliers;
        self.score = score;
        self.budget = budget(score);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ransac_iterations_bounds() {
        for s in [2, 4, 8] {
            let mut prev = usize::MAX;
            for i in 0..=20 {
                let epsilon = i as f64 / 20.0;
                let its = ransac_iterations(0.99, epsilon, s, 10, 5000, 1.0);
                assert!((10..=5000).contains(&its));
                // non-increasing in the inlier fraction
                assert!(its <= prev);
                prev = its;
            }
            assert_eq!(ransac_iterations(0.99, 0.0, s, 10, 5000, 1.0), 5000);
        }
    }

    #[test]
    fn test_ransac_iterations_values() {
        // log(0.01) / log(0.75) = 16.008
        assert_eq!(ransac_iterations(0.99, 0.5, 2, 1, 1000, 1.0), 17);
        assert_eq!(ransac_iterations(0.99, 0.5, 2, 1, 1000, 3.0), 51);
        // 1.5 * 17 = 25.5 rounds up
        assert_eq!(ransac_iterations(0.99, 0.5, 2, 1, 1000, 1.5), 26);
        assert_eq!(ransac_iterations(0.99, 0.5, 2, 20, 1000, 1.0), 20);
        assert_eq!(ransac_iterations(0.99, 0.5, 8, 1, 100, 1.0), 100);
        assert_eq!(ransac_iterations(0.99, f64::NAN, 8, 1, 100, 1.0), 100);
    }

    #[test]
    fn test_best_model_strict_improvement() {
        let mut best = BestModel::new(3, 100);
        assert!(best.model.is_none());
        assert_eq!(best.inliers, vec![false; 3]);

        assert!(best.update(1, vec![true, false, false], 1.0 / 3.0, |_| 50));
        assert_eq!(best.budget, 50);
        // equal score does not replace the model
        assert!(!best.update(2, vec![false, true, false], 1.0 / 3.0, |_| 10));
        assert_eq!(best.model, Some(1));
        assert_eq!(best.budget, 50);

        assert!(best.update(3, vec![true, true, false], 2.0 / 3.0, |_| 20));
        assert_eq!(best.model, Some(3));
        assert_eq!(best.budget, 20);
    }

    #[test]
    fn test_sample_indices_distinct() {
        let mut rng = RansacParams::default().rng();
        for _ in 0..50 {
            let mut idx = sample_indices(&mut rng, 10, 8);
            idx.sort_unstable();
            idx.dedup();
            assert_eq!(idx.len(), 8);
            assert!(idx.iter().all(|&i| i < 10));
        }
    }

    #[test]
    fn test_seeded_rng_is_deterministic() {
        let params = RansacParams::default().with_random_seed(Some(42));
        let a = sample_indices(&mut params.rng(), 100, 4);
        let b = sample_indices(&mut params.rng(), 100, 4);
        assert_eq!(a, b);
    }

    #[test]
    fn test_params_serde() -> Result<(), Box<dyn std::error::Error>> {
        let params: RansacParams =
            serde_json::from_str(r#"{"threshold_px": 2.5, "random_seed": null}"#)?;
        assert_eq!(params.threshold_px, 2.5);
        assert_eq!(params.random_seed, None);
        assert_eq!(params.max_iterations, 10000);

        let params = RansacParams::default()
            .with_iterations(5, 50)
            .with_confidence(0.9)
            .with_iteration_scale(2.0);
        let back: RansacParams = serde_json::from_str(&serde_json::to_string(&params)?)?;
        assert_eq!(back, params);
        Ok(())
    }
}
