use std::fmt;
use std::str::FromStr;

use crate::Model;

/// A pair of corresponding points in the local frames of two tiles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointMatch<const D: usize> {
    /// Point in the first tile.
    pub p1: [f64; D],
    /// Point in the second tile.
    pub p2: [f64; D],
    /// Quality weight of the match.
    pub weight: f64,
}

impl<const D: usize> PointMatch<D> {
    /// Create a match with unit weight.
    pub fn new(p1: [f64; D], p2: [f64; D]) -> Self {
        Self { p1, p2, weight: 1.0 }
    }

    /// The same match seen from the second tile.
    pub fn flipped(&self) -> Self {
        Self {
            p1: self.p2,
            p2: self.p1,
            weight: self.weight,
        }
    }

    /// Whether all coordinates and the weight are finite.
    pub fn is_finite(&self) -> bool {
        self.p1.iter().chain(&self.p2).all(|v| v.is_finite()) && self.weight.is_finite()
    }

    /// Distance between `p2` and `p1` transferred by `model`.
    pub fn distance<M: Model<D>>(&self, model: &M) -> f64 {
        distance(&model.apply(&self.p1), &self.p2)
    }
}

/// Euclidean distance between two points.
pub fn distance<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Method that produced a set of correspondences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchMethod {
    /// Dense block matching by maximal correlation.
    BlockMatching,
    /// Sparse scale-space features.
    Sift,
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MatchMethod::BlockMatching => write!(f, "block-matching"),
            MatchMethod::Sift => write!(f, "sift"),
        }
    }
}

impl FromStr for MatchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "block-matching" => Ok(MatchMethod::BlockMatching),
            "sift" => Ok(MatchMethod::Sift),
            other => Err(format!("unknown match method: {other}")),
        }
    }
}

/// Correspondences between exactly two tiles, tagged with their provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrespondenceSet<const D: usize> {
    /// Identifier of the first tile, `p1` of every match.
    pub source_id: String,
    /// Identifier of the second tile, `p2` of every match.
    pub target_id: String,
    /// Extraction method.
    pub method: MatchMethod,
    /// Fingerprint of the parameters that produced the set.
    pub fingerprint: String,
    /// The correspondences in extraction order.
    pub matches: Vec<PointMatch<D>>,
}

impl<const D: usize> CorrespondenceSet<D> {
    /// Number of correspondences.
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    /// Whether the set holds no correspondences.
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TranslationModel2d;

    #[test]
    fn test_flipped() {
        let m = PointMatch {
            p1: [1.0, 2.0],
            p2: [3.0, 4.0],
            weight: 0.5,
        };
        let f = m.flipped();
        assert_eq!(f.p1, [3.0, 4.0]);
        assert_eq!(f.p2, [1.0, 2.0]);
        assert_eq!(f.weight, 0.5);
        assert_eq!(f.flipped(), m);
    }

    #[test]
    fn test_distance() {
        let m = PointMatch::new([0.0, 0.0], [3.0, 4.0]);
        assert_eq!(m.distance(&TranslationModel2d::default()), 5.0);
        assert_eq!(m.distance(&TranslationModel2d::new([3.0, 4.0])), 0.0);
        assert!(!PointMatch::new([f64::NAN, 0.0], [0.0, 0.0]).is_finite());
    }

    #[test]
    fn test_match_method_roundtrip() {
        for method in [MatchMethod::BlockMatching, MatchMethod::Sift] {
            assert_eq!(method.to_string().parse::<MatchMethod>(), Ok(method));
        }
        assert!("orb".parse::<MatchMethod>().is_err());
    }
}
