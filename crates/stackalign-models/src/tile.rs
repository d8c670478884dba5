//! Tiles connected by correspondences and their global optimization.
//!
//! Every tile carries a model mapping its local frame into the global frame.
//! An undirected edge holds the correspondences between two tiles, `p1` in
//! the first tile and `p2` in the second, and is visible from both endpoints.
//! The optimizer moves every free tile so that its local points land on the
//! world positions of their partners, sweeping all tiles in parallel against
//! a snapshot of the previous iteration.

use std::collections::BTreeSet;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{distance, ErrorStatistic, Model, OptimizeError, PointMatch};

/// Slope below which the error is considered stalled.
const PLATEAU_TOLERANCE: f64 = 1e-4;

/// Parameters of the global optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerParams {
    /// Stop as soon as the mean error is at or below this value.
    pub max_allowed_error: f64,
    /// Number of iterations the error is observed for stalling.
    pub max_plateau_width: usize,
    /// Maximal number of iterations.
    pub max_iterations: usize,
    /// Fraction of every update step that is applied, in `(0, 1]`.
    pub damp: f64,
}

impl Default for OptimizerParams {
    fn default() -> Self {
        Self {
            max_allowed_error: 0.0,
            max_plateau_width: 200,
            max_iterations: 1000,
            damp: 1.0,
        }
    }
}

/// A correspondence set between two tiles, shared by both endpoints.
#[derive(Debug, Clone)]
pub struct Edge<const D: usize> {
    /// First tile, owner of the `p1` points.
    pub a: usize,
    /// Second tile, owner of the `p2` points.
    pub b: usize,
    /// The correspondences.
    pub matches: Arc<Vec<PointMatch<D>>>,
}

/// The placement state of one image.
#[derive(Debug, Clone)]
pub struct Tile<M> {
    /// Transform from the local into the global frame.
    pub model: M,
    edges: Vec<usize>,
}

impl<M> Tile<M> {
    /// Indices of the edges touching this tile.
    pub fn edges(&self) -> &[usize] {
        &self.edges
    }
}

/// Summary of an optimization run.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeReport {
    /// Number of iterations performed.
    pub iterations: usize,
    /// Mean error of the returned state.
    pub final_error: f64,
    /// Aggregate squared residual before optimizing.
    pub initial_residual: f64,
    /// Aggregate squared residual of the returned state.
    pub residual: f64,
    /// Tiles without any correspondence, left at their prior transform.
    pub unconstrained: Vec<usize>,
}

/// A set of tiles and the edges between them.
#[derive(Debug, Clone)]
pub struct TileConfiguration<M, const D: usize> {
    tiles: Vec<Tile<M>>,
    edges: Vec<Edge<D>>,
    fixed: BTreeSet<usize>,
}

impl<M: Model<D>, const D: usize> TileConfiguration<M, D> {
    /// Create `n` tiles at the identity transform.
    pub fn new(n: usize) -> Self {
        Self::from_models(vec![M::default(); n])
    }

    /// Create one tile per model, in order.
    pub fn from_models(models: Vec<M>) -> Self {
        Self {
            tiles: models
                .into_iter()
                .map(|model| Tile {
                    model,
                    edges: Vec::new(),
                })
                .collect(),
            edges: Vec::new(),
            fixed: BTreeSet::new(),
        }
    }

    /// Number of tiles.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Whether there are no tiles.
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// The tiles in order.
    pub fn tiles(&self) -> &[Tile<M>] {
        &self.tiles
    }

    /// All edges.
    pub fn edges(&self) -> &[Edge<D>] {
        &self.edges
    }

    /// The current models, one per tile.
    pub fn models(&self) -> Vec<M> {
        self.tiles.iter().map(|t| t.model.clone()).collect()
    }

    fn check_index(&self, index: usize) -> Result<(), OptimizeError> {
        if index >= self.tiles.len() {
            return Err(OptimizeError::InvalidTileIndex {
                index,
                len: self.tiles.len(),
            });
        }
        Ok(())
    }

    /// Connect tiles `a` and `b` with matches from `a` (`p1`) to `b` (`p2`).
    ///
    /// Returns the edge index. Empty match sets and self connections are ignored.
    pub fn connect(
        &mut self,
        a: usize,
        b: usize,
        matches: Vec<PointMatch<D>>,
    ) -> Result<Option<usize>, OptimizeError> {
        self.check_index(a)?;
        self.check_index(b)?;
        if a == b || matches.is_empty() {
            return Ok(None);
        }

        let index = self.edges.len();
        self.edges.push(Edge {
            a,
            b,
            matches: Arc::new(matches),
        });
        self.tiles[a].edges.push(index);
        self.tiles[b].edges.push(index);
        Ok(Some(index))
    }

    /// Keep the transform of tile `index` constant during optimization.
    pub fn fix_tile(&mut self, index: usize) -> Result<(), OptimizeError> {
        self.check_index(index)?;
        self.fixed.insert(index);
        Ok(())
    }

    /// Whether tile `index` is fixed.
    pub fn is_fixed(&self, index: usize) -> bool {
        self.fixed.contains(&index)
    }

    /// Residual vectors of an edge seen from one of its tiles.
    ///
    /// Each residual is the world position of the local point of `from_tile`
    /// minus the world position of its partner. Seen from the other tile, the
    /// residuals have the same magnitude and opposite sign.
    pub fn edge_residuals(&self, edge: usize, from_tile: usize) -> Vec<[f64; D]> {
        let Some(e) = self.edges.get(edge) else {
            return Vec::new();
        };
        let ma = &self.tiles[e.a].model;
        let mb = &self.tiles[e.b].model;
        e.matches
            .iter()
            .map(|m| {
                let (wa, wb) = (ma.apply(&m.p1), mb.apply(&m.p2));
                std::array::from_fn(|d| {
                    if from_tile == e.b {
                        wb[d] - wa[d]
                    } else {
                        wa[d] - wb[d]
                    }
                })
            })
            .collect()
    }

    /// Sum over all edges of the weighted squared residuals.
    pub fn total_squared_residual(&self) -> f64 {
        total_squared_residual(&self.tiles, &self.edges)
    }

    /// Mean over connected tiles of their weighted mean residual distance.
    pub fn mean_error(&self) -> f64 {
        mean_error(&self.tiles, &self.edges)
    }

    /// Matches of tile `index` with `p2` moved to the world frame of the partner.
    fn world_targets(&self, models: &[M], index: usize) -> Vec<PointMatch<D>> {
        let mut targets = Vec::new();
        for &e in &self.tiles[index].edges {
            let edge = &self.edges[e];
            for m in edge.matches.iter() {
                let (local, other, other_model) = if edge.a == index {
                    (m.p1, m.p2, &models[edge.b])
                } else {
                    (m.p2, m.p1, &models[edge.a])
                };
                targets.push(PointMatch {
                    p1: local,
                    p2: other_model.apply(&other),
                    weight: m.weight,
                });
            }
        }
        targets
    }

    /// Optimize all free tiles to minimize the residuals of their edges.
    ///
    /// Iterates parallel update sweeps until the mean error reaches
    /// `max_allowed_error`, the error stalls for `max_plateau_width`
    /// iterations, or `max_iterations` is exhausted. The state with the lowest
    /// aggregate squared residual observed, including the initial one, is kept.
    /// Tiles without edges, or whose model cannot be fitted, keep their prior
    /// transform and are reported with a warning.
    pub fn optimize(&mut self, params: &OptimizerParams) -> Result<OptimizeReport, OptimizeError> {
        if self.tiles.is_empty() {
            return Err(OptimizeError::NoTiles);
        }
        if !(params.damp > 0.0 && params.damp <= 1.0) {
            return Err(OptimizeError::InvalidDamp(params.damp));
        }

        let unconstrained = self
            .tiles
            .iter()
            .enumerate()
            .filter(|(_, t)| t.edges.is_empty())
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        for i in &unconstrained {
            log::warn!("tile {} has no correspondences, its transform stays unconstrained", i);
        }

        let initial_residual = self.total_squared_residual();
        let mut best = (initial_residual, self.models());
        let mut stat = ErrorStatistic::new(params.max_plateau_width + 1);
        let mut failed = BTreeSet::new();
        let mut iterations = 0;

        while iterations < params.max_iterations {
            iterations += 1;

            let snapshot = self.models();
            let updates = (0..self.tiles.len())
                .into_par_iter()
                .map(|i| {
                    if self.fixed.contains(&i) || self.tiles[i].edges.is_empty() {
                        return (snapshot[i].clone(), false);
                    }
                    let targets = self.world_targets(&snapshot, i);
                    let mut fitted = snapshot[i].clone();
                    match fitted.fit(&targets) {
                        Ok(()) => (snapshot[i].interpolate(&fitted, params.damp), false),
                        Err(_) => (snapshot[i].clone(), true),
                    }
                })
                .collect::<Vec<_>>();

            for (i, (model, fit_failed)) in updates.into_iter().enumerate() {
                self.tiles[i].model = model;
                if fit_failed {
                    failed.insert(i);
                }
            }

            let error = self.mean_error();
            stat.add(error);

            let residual = self.total_squared_residual();
            if residual < best.0 {
                best = (residual, self.models());
            }

            if error <= params.max_allowed_error {
                break;
            }
            if iterations > params.max_plateau_width
                && stat.is_plateau(params.max_plateau_width, PLATEAU_TOLERANCE)
            {
                break;
            }
        }

        for i in &failed {
            log::warn!("tile {} could not be fitted, its transform was kept", i);
        }

        let (residual, models) = best;
        for (tile, model) in self.tiles.iter_mut().zip(models) {
            tile.model = model;
        }
        let final_error = self.mean_error();

        log::debug!(
            "optimized {} tiles in {} iterations, error {:.4}, residual {:.4} -> {:.4}",
            self.tiles.len(),
            iterations,
            final_error,
            initial_residual,
            residual
        );

        Ok(OptimizeReport {
            iterations,
            final_error,
            initial_residual,
            residual,
            unconstrained,
        })
    }
}

fn total_squared_residual<M: Model<D>, const D: usize>(tiles: &[Tile<M>], edges: &[Edge<D>]) -> f64 {
    edges
        .iter()
        .map(|e| {
            let (ma, mb) = (&tiles[e.a].model, &tiles[e.b].model);
            e.matches
                .iter()
                .map(|m| m.weight * distance(&ma.apply(&m.p1), &mb.apply(&m.p2)).powi(2))
                .fold(0.0, |acc, r| acc + r)
        })
        .fold(0.0, |acc, r| acc + r)
}

fn mean_error<M: Model<D>, const D: usize>(tiles: &[Tile<M>], edges: &[Edge<D>]) -> f64 {
    let per_tile = tiles
        .iter()
        .filter(|t| !t.edges.is_empty())
        .map(|t| {
            let (sum, weights) = t
                .edges
                .iter()
                .flat_map(|&e| {
                    let edge = &edges[e];
                    let (ma, mb) = (&tiles[edge.a].model, &tiles[edge.b].model);
                    edge.matches
                        .iter()
                        .map(move |m| (m.weight * distance(&ma.apply(&m.p1), &mb.apply(&m.p2)), m.weight))
                })
                .fold((0.0, 0.0), |(s, w), (d, mw)| (s + d, w + mw));
            if weights > 0.0 {
                sum / weights
            } else {
                0.0
            }
        })
        .collect::<Vec<_>>();

    if per_tile.is_empty() {
        0.0
    } else {
        per_tile.iter().sum::<f64>() / per_tile.len() as f64
    }
}
