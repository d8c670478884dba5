use rayon::prelude::*;

use super::Feature;

/// Squared euclidean distance between two descriptors.
#[inline]
fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Match float descriptors using brute-force euclidean distance.
///
/// For each feature in `features1`, finds the nearest and second nearest neighbour
/// in `features2` and keeps the pair only if `best / second < rod`.
///
/// # Arguments
///
/// * `features1` - First set of features.
/// * `features2` - Second set of features.
/// * `rod` - Ratio of distances between the best and second best candidate.
///
/// # Returns
///
/// Vector of `(i, j)` index pairs into `features1` and `features2`.
pub fn match_features(features1: &[Feature], features2: &[Feature], rod: f32) -> Vec<(usize, usize)> {
    if features1.is_empty() || features2.len() < 2 {
        return vec![];
    }

    features1
        .par_iter()
        .enumerate()
        .filter_map(|(i, f1)| {
            let mut best = (usize::MAX, f32::MAX);
            let mut second = f32::MAX;
            for (j, f2) in features2.iter().enumerate() {
                if f2.descriptor.len() != f1.descriptor.len() {
                    continue;
                }
                let d = squared_distance(&f1.descriptor, &f2.descriptor);
                if d < best.1 {
                    second = best.1;
                    best = (j, d);
                } else if d < second {
                    second = d;
                }
            }

            if best.0 == usize::MAX || second == f32::MAX {
                return None;
            }
            // compare distances, not their squares
            (best.1.sqrt() < rod * second.sqrt()).then_some((i, best.0))
        })
        .collect()
}

/// Filter feature matches by geometric plausibility.
///
/// Drops pairs whose scales differ by more than `max_scale_ratio`, pairs whose
/// locations are further apart than `max_distance` pixels, and every pair whose
/// target feature is claimed by more than one source feature.
pub fn filter_feature_matches(
    features1: &[Feature],
    features2: &[Feature],
    matches: &[(usize, usize)],
    max_scale_ratio: f64,
    max_distance: f64,
) -> Vec<(usize, usize)> {
    let plausible = matches
        .iter()
        .copied()
        .filter(|&(i, j)| {
            let (f1, f2) = (&features1[i], &features2[j]);
            let ratio = f1.scale.max(f2.scale) / f1.scale.min(f2.scale);
            let dx = f1.location[0] - f2.location[0];
            let dy = f1.location[1] - f2.location[1];
            ratio <= max_scale_ratio && (dx * dx + dy * dy).sqrt() <= max_distance
        })
        .collect::<Vec<_>>();

    let mut claims = std::collections::HashMap::<usize, usize>::new();
    for &(_, j) in &plausible {
        *claims.entry(j).or_default() += 1;
    }

    plausible
        .into_iter()
        .filter(|(_, j)| claims.get(j) == Some(&1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(x: f64, scale: f64, descriptor: Vec<f32>) -> Feature {
        Feature {
            location: [x, 0.0],
            scale,
            orientation: 0.0,
            descriptor,
        }
    }

    #[test]
    fn test_match_features_ratio() {
        let f1 = vec![
            feature(0.0, 1.0, vec![1.0, 0.0, 0.0]),
            feature(1.0, 1.0, vec![0.0, 0.7, 0.7]),
        ];
        let f2 = vec![
            feature(0.0, 1.0, vec![0.99, 0.1, 0.0]),
            feature(1.0, 1.0, vec![0.0, 1.0, 0.0]),
            feature(2.0, 1.0, vec![0.0, 0.0, 1.0]),
        ];

        let matches = match_features(&f1, &f2, 0.8);
        // the second feature is equally close to two candidates
        assert_eq!(matches, vec![(0, 0)]);
    }

    #[test]
    fn test_match_features_empty() {
        let f = vec![feature(0.0, 1.0, vec![1.0])];
        assert!(match_features(&[], &f, 0.9).is_empty());
        assert!(match_features(&f, &f, 0.9).is_empty());
    }

    #[test]
    fn test_filter_feature_matches() {
        let f1 = vec![
            feature(0.0, 1.0, vec![]),
            feature(5.0, 1.0, vec![]),
            feature(9.0, 4.0, vec![]),
            feature(100.0, 1.0, vec![]),
            feature(3.0, 1.0, vec![]),
        ];
        let f2 = vec![
            feature(1.0, 1.2, vec![]),
            feature(6.0, 1.0, vec![]),
            feature(9.0, 1.0, vec![]),
            feature(0.0, 1.0, vec![]),
        ];
        let matches = vec![(0, 0), (1, 1), (2, 2), (3, 3), (4, 1)];

        let kept = filter_feature_matches(&f1, &f2, &matches, 1.5, 50.0);
        // (2, 2) fails the scale ratio, (3, 3) the distance, (1, 1) and (4, 1) share a target
        assert_eq!(kept, vec![(0, 0)]);
    }
}
