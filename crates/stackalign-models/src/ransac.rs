//! Random sample consensus over point correspondences.
//!
//! Hypotheses are fitted to minimal random samples and scored by the number
//! of correspondences they transfer within `max_epsilon`. The best consensus
//! set is refined by an iterative robust filter that drops matches whose
//! residual exceeds `max_trust` times the median residual.

use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{Model, ModelError, PointMatch};

/// Lower bound of the robust filter threshold, in pixels.
const MIN_FILTER_THRESHOLD: f64 = 1e-3;

/// Parameters for RANSAC over correspondences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    /// Number of random hypotheses.
    pub iterations: usize,
    /// Maximal transfer error of an inlier, in pixels.
    pub max_epsilon: f64,
    /// Minimal ratio of inliers over candidates.
    pub min_inlier_ratio: f64,
    /// Minimal number of inliers.
    pub min_num_inliers: usize,
    /// Matches with a residual above `max_trust * median` are rejected by the filter.
    pub max_trust: f64,
    /// Seed of the hypothesis sampler.
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            iterations: 1000,
            max_epsilon: 25.0,
            min_inlier_ratio: 0.05,
            min_num_inliers: 5,
            max_trust: 4.0,
            seed: 0,
        }
    }
}

/// Find the largest set of correspondences consistent with one model instance.
///
/// # Arguments
///
/// * `candidates` - The candidate correspondences.
/// * `params` - The RANSAC parameters.
///
/// # Returns
///
/// The model fitted to the inliers and the inliers in candidate order.
///
/// # Errors
///
/// `NotEnoughDataPoints` when there are fewer candidates than the model needs,
/// `NoConsensus` when the inliers fall short of `min_num_inliers` or
/// `min_inlier_ratio`.
pub fn filter_ransac<M: Model<D>, const D: usize>(
    candidates: &[PointMatch<D>],
    params: &RansacParams,
) -> Result<(M, Vec<PointMatch<D>>), ModelError> {
    let n = candidates.len();
    let required = M::MIN_NUM_MATCHES.max(params.min_num_inliers);
    if n < M::MIN_NUM_MATCHES {
        return Err(ModelError::NotEnoughDataPoints {
            required,
            actual: n,
        });
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Vec<usize> = Vec::new();
    let mut sample = Vec::with_capacity(M::MIN_NUM_MATCHES);

    for _ in 0..params.iterations {
        sample.clear();
        sample.extend(
            rand::seq::index::sample(&mut rng, n, M::MIN_NUM_MATCHES)
                .iter()
                .map(|i| candidates[i]),
        );

        let mut model = M::default();
        if model.fit(&sample).is_err() {
            continue;
        }

        let inliers = inlier_indices(&model, candidates, params.max_epsilon);
        if inliers.len() > best.len() {
            best = inliers;
            if best.len() == n {
                break;
            }
        }
    }

    let best = refine_consensus::<M, D>(candidates, best, params.max_epsilon);

    let ratio = best.len() as f64 / n as f64;
    if best.len() < required || ratio < params.min_inlier_ratio {
        return Err(ModelError::NoConsensus {
            inliers: best.len(),
            candidates: n,
        });
    }

    let inliers = best.iter().map(|&i| candidates[i]).collect::<Vec<_>>();
    let (model, inliers) = filter::<M, D>(&inliers, params.max_trust)?;
    if inliers.len() < required {
        return Err(ModelError::NoConsensus {
            inliers: inliers.len(),
            candidates: n,
        });
    }
    Ok((model, inliers))
}

/// Iteratively fit a model and drop matches with residual above `max_trust * median`.
///
/// Stops when no match is dropped. The threshold never falls below one
/// thousandth of a pixel so exact correspondences are kept.
pub fn filter<M: Model<D>, const D: usize>(
    matches: &[PointMatch<D>],
    max_trust: f64,
) -> Result<(M, Vec<PointMatch<D>>), ModelError> {
    let mut kept = matches.to_vec();
    let mut model = M::default();
    loop {
        model.fit(&kept)?;

        let mut residuals = kept.iter().map(|m| m.distance(&model)).collect::<Vec<_>>();
        let threshold = (max_trust * median(&mut residuals)).max(MIN_FILTER_THRESHOLD);

        let before = kept.len();
        kept.retain(|m| m.distance(&model) <= threshold);
        if kept.len() == before {
            return Ok((model, kept));
        }
    }
}

/// Upper bound on the refits of a consensus set.
const MAX_REFITS: usize = 100;

/// Refit on the consensus set while each refit gains inliers.
fn refine_consensus<M: Model<D>, const D: usize>(
    candidates: &[PointMatch<D>],
    mut best: Vec<usize>,
    max_epsilon: f64,
) -> Vec<usize> {
    let mut model = M::default();
    for _ in 0..MAX_REFITS {
        let inliers = best.iter().map(|&i| candidates[i]).collect::<Vec<_>>();
        if inliers.len() < M::MIN_NUM_MATCHES || model.fit(&inliers).is_err() {
            break;
        }
        let refined = inlier_indices(&model, candidates, max_epsilon);
        if refined.len() <= best.len() {
            break;
        }
        best = refined;
    }
    best
}

fn inlier_indices<M: Model<D>, const D: usize>(
    model: &M,
    candidates: &[PointMatch<D>],
    max_epsilon: f64,
) -> Vec<usize> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, m)| m.distance(model) < max_epsilon)
        .map(|(i, _)| i)
        .collect()
}

/// Median of the values, reordering them. Zero for an empty slice.
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
