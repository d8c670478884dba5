use glam::{DMat2, DMat3, DVec2, DVec3};

use crate::{ModelError, PointMatch};

/// A transformation of `D`-dimensional points that can be estimated from correspondences.
///
/// Flat matrices are row-major `D x (D + 1)`: the linear part followed by the
/// translation in the last column of every row.
pub trait Model<const D: usize>: Clone + Default + std::fmt::Debug + Send + Sync {
    /// Minimal number of matches that determine the model.
    const MIN_NUM_MATCHES: usize;

    /// Transfer a point.
    fn apply(&self, p: &[f64; D]) -> [f64; D];

    /// Estimate the model minimizing the weighted squared distance of `p1 -> p2`.
    fn fit(&mut self, matches: &[PointMatch<D>]) -> Result<(), ModelError>;

    /// The model as a flat row-major matrix.
    fn to_matrix(&self) -> Vec<f64>;

    /// Build the model from a flat row-major matrix.
    fn from_matrix(m: &[f64]) -> Result<Self, ModelError>;

    /// Linear blend of the parameters, `self * (1 - lambda) + other * lambda`.
    fn interpolate(&self, other: &Self, lambda: f64) -> Self;

    /// Weighted mean transfer distance over `matches`, zero when empty.
    fn cost(&self, matches: &[PointMatch<D>]) -> f64 {
        let (sum, weights) = matches.iter().fold((0.0, 0.0), |(s, w), m| {
            (s + m.weight * m.distance(self), w + m.weight)
        });
        if weights > 0.0 {
            sum / weights
        } else {
            0.0
        }
    }
}

fn check_min<const D: usize>(matches: &[PointMatch<D>], required: usize) -> Result<(), ModelError> {
    if matches.len() < required {
        return Err(ModelError::NotEnoughDataPoints {
            required,
            actual: matches.len(),
        });
    }
    Ok(())
}

fn check_len(m: &[f64], expected: usize) -> Result<(), ModelError> {
    if m.len() != expected {
        return Err(ModelError::InvalidMatrixLength {
            expected,
            actual: m.len(),
        });
    }
    Ok(())
}

fn total_weight<const D: usize>(matches: &[PointMatch<D>]) -> Result<f64, ModelError> {
    let w: f64 = matches.iter().map(|m| m.weight).sum();
    if w <= 0.0 || !w.is_finite() {
        return Err(ModelError::IllDefinedDataPoints);
    }
    Ok(w)
}

fn lerp(a: f64, b: f64, lambda: f64) -> f64 {
    a * (1.0 - lambda) + b * lambda
}

/// A 2D translation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TranslationModel2d {
    /// The translation vector.
    pub t: [f64; 2],
}

impl TranslationModel2d {
    /// Create a translation by `t`.
    pub fn new(t: [f64; 2]) -> Self {
        Self { t }
    }
}

impl Model<2> for TranslationModel2d {
    const MIN_NUM_MATCHES: usize = 1;

    fn apply(&self, p: &[f64; 2]) -> [f64; 2] {
        [p[0] + self.t[0], p[1] + self.t[1]]
    }

    fn fit(&mut self, matches: &[PointMatch<2>]) -> Result<(), ModelError> {
        check_min(matches, Self::MIN_NUM_MATCHES)?;
        let w = total_weight(matches)?;
        let mut t = [0.0; 2];
        for m in matches {
            for (d, td) in t.iter_mut().enumerate() {
                *td += m.weight * (m.p2[d] - m.p1[d]);
            }
        }
        self.t = [t[0] / w, t[1] / w];
        Ok(())
    }

    fn to_matrix(&self) -> Vec<f64> {
        vec![1.0, 0.0, self.t[0], 0.0, 1.0, self.t[1]]
    }

    fn from_matrix(m: &[f64]) -> Result<Self, ModelError> {
        check_len(m, 6)?;
        Ok(Self { t: [m[2], m[5]] })
    }

    fn interpolate(&self, other: &Self, lambda: f64) -> Self {
        Self {
            t: [
                lerp(self.t[0], other.t[0], lambda),
                lerp(self.t[1], other.t[1], lambda),
            ],
        }
    }
}

/// A 2D affine transformation `x -> m * x + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineModel2d {
    /// Linear part.
    pub m: DMat2,
    /// Translation.
    pub t: DVec2,
}

impl Default for AffineModel2d {
    fn default() -> Self {
        Self {
            m: DMat2::IDENTITY,
            t: DVec2::ZERO,
        }
    }
}

impl Model<2> for AffineModel2d {
    const MIN_NUM_MATCHES: usize = 3;

    fn apply(&self, p: &[f64; 2]) -> [f64; 2] {
        (self.m * DVec2::from_array(*p) + self.t).to_array()
    }

    fn fit(&mut self, matches: &[PointMatch<2>]) -> Result<(), ModelError> {
        check_min(matches, Self::MIN_NUM_MATCHES)?;
        let w = total_weight(matches)?;

        let (pc, qc) = matches.iter().fold((DVec2::ZERO, DVec2::ZERO), |(pc, qc), m| {
            (
                pc + DVec2::from_array(m.p1) * m.weight,
                qc + DVec2::from_array(m.p2) * m.weight,
            )
        });
        let (pc, qc) = (pc / w, qc / w);

        let mut ptp = DMat2::ZERO;
        let mut qtp = DMat2::ZERO;
        for m in matches {
            let p = DVec2::from_array(m.p1) - pc;
            let q = DVec2::from_array(m.p2) - qc;
            ptp += DMat2::from_cols(p * p.x, p * p.y) * m.weight;
            qtp += DMat2::from_cols(q * p.x, q * p.y) * m.weight;
        }

        if ptp.determinant().abs() < 1e-12 {
            return Err(ModelError::IllDefinedDataPoints);
        }

        self.m = qtp * ptp.inverse();
        self.t = qc - self.m * pc;
        Ok(())
    }

    fn to_matrix(&self) -> Vec<f64> {
        vec![
            self.m.x_axis.x,
            self.m.y_axis.x,
            self.t.x,
            self.m.x_axis.y,
            self.m.y_axis.y,
            self.t.y,
        ]
    }

    fn from_matrix(m: &[f64]) -> Result<Self, ModelError> {
        check_len(m, 6)?;
        Ok(Self {
            m: DMat2::from_cols(DVec2::new(m[0], m[3]), DVec2::new(m[1], m[4])),
            t: DVec2::new(m[2], m[5]),
        })
    }

    fn interpolate(&self, other: &Self, lambda: f64) -> Self {
        Self {
            m: self.m * (1.0 - lambda) + other.m * lambda,
            t: self.t.lerp(other.t, lambda),
        }
    }
}

/// A 3D translation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TranslationModel3d {
    /// The translation vector.
    pub t: [f64; 3],
}

impl Model<3> for TranslationModel3d {
    const MIN_NUM_MATCHES: usize = 1;

    fn apply(&self, p: &[f64; 3]) -> [f64; 3] {
        [p[0] + self.t[0], p[1] + self.t[1], p[2] + self.t[2]]
    }

    fn fit(&mut self, matches: &[PointMatch<3>]) -> Result<(), ModelError> {
        check_min(matches, Self::MIN_NUM_MATCHES)?;
        let w = total_weight(matches)?;
        let t = matches.iter().fold(DVec3::ZERO, |t, m| {
            t + (DVec3::from_array(m.p2) - DVec3::from_array(m.p1)) * m.weight
        });
        self.t = (t / w).to_array();
        Ok(())
    }

    fn to_matrix(&self) -> Vec<f64> {
        AffineModel3d {
            m: DMat3::IDENTITY,
            t: DVec3::from_array(self.t),
        }
        .to_matrix()
    }

    fn from_matrix(m: &[f64]) -> Result<Self, ModelError> {
        check_len(m, 12)?;
        Ok(Self {
            t: [m[3], m[7], m[11]],
        })
    }

    fn interpolate(&self, other: &Self, lambda: f64) -> Self {
        Self {
            t: DVec3::from_array(self.t)
                .lerp(DVec3::from_array(other.t), lambda)
                .to_array(),
        }
    }
}

/// A 3D affine transformation `x -> m * x + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineModel3d {
    /// Linear part.
    pub m: DMat3,
    /// Translation.
    pub t: DVec3,
}

impl Default for AffineModel3d {
    fn default() -> Self {
        Self {
            m: DMat3::IDENTITY,
            t: DVec3::ZERO,
        }
    }
}

impl AffineModel3d {
    /// The inverse transformation.
    pub fn inverse(&self) -> Result<Self, ModelError> {
        if self.m.determinant().abs() < 1e-12 {
            return Err(ModelError::NotInvertible);
        }
        let m = self.m.inverse();
        Ok(Self { m, t: -(m * self.t) })
    }

    /// The transformation applying `other` first and then `self`.
    pub fn concatenate(&self, other: &Self) -> Self {
        Self {
            m: self.m * other.m,
            t: self.m * other.t + self.t,
        }
    }
}

impl Model<3> for AffineModel3d {
    const MIN_NUM_MATCHES: usize = 4;

    fn apply(&self, p: &[f64; 3]) -> [f64; 3] {
        (self.m * DVec3::from_array(*p) + self.t).to_array()
    }

    fn fit(&mut self, matches: &[PointMatch<3>]) -> Result<(), ModelError> {
        check_min(matches, Self::MIN_NUM_MATCHES)?;
        let w = total_weight(matches)?;

        let (pc, qc) = matches.iter().fold((DVec3::ZERO, DVec3::ZERO), |(pc, qc), m| {
            (
                pc + DVec3::from_array(m.p1) * m.weight,
                qc + DVec3::from_array(m.p2) * m.weight,
            )
        });
        let (pc, qc) = (pc / w, qc / w);

        let mut ptp = DMat3::ZERO;
        let mut qtp = DMat3::ZERO;
        for m in matches {
            let p = DVec3::from_array(m.p1) - pc;
            let q = DVec3::from_array(m.p2) - qc;
            ptp += DMat3::from_cols(p * p.x, p * p.y, p * p.z) * m.weight;
            qtp += DMat3::from_cols(q * p.x, q * p.y, q * p.z) * m.weight;
        }

        if ptp.determinant().abs() < 1e-12 {
            return Err(ModelError::IllDefinedDataPoints);
        }

        self.m = qtp * ptp.inverse();
        self.t = qc - self.m * pc;
        Ok(())
    }

    fn to_matrix(&self) -> Vec<f64> {
        let rows = self.m.transpose();
        [rows.x_axis, rows.y_axis, rows.z_axis]
            .iter()
            .zip(self.t.to_array())
            .flat_map(|(r, t)| [r.x, r.y, r.z, t])
            .collect()
    }

    fn from_matrix(m: &[f64]) -> Result<Self, ModelError> {
        check_len(m, 12)?;
        let rows = DMat3::from_cols(
            DVec3::new(m[0], m[1], m[2]),
            DVec3::new(m[4], m[5], m[6]),
            DVec3::new(m[8], m[9], m[10]),
        );
        Ok(Self {
            m: rows.transpose(),
            t: DVec3::new(m[3], m[7], m[11]),
        })
    }

    fn interpolate(&self, other: &Self, lambda: f64) -> Self {
        Self {
            m: self.m * (1.0 - lambda) + other.m * lambda,
            t: self.t.lerp(other.t, lambda),
        }
    }
}
