//! Weighted aggregation of sub-scores into one suitability score per cell.

use tracing::debug;

use crate::config::CriteriaConfig;
use crate::error::{HabitatError, Result};
use crate::normalize::{Criterion, SubScores};
use crate::raster::RasterLayer;

/// Positive criterion weights in [`Criterion::ALL`] order. They need not sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights([f64; 6]);

impl Weights {
    /// Weights in [`Criterion::ALL`] order.
    pub fn new(weights: [f64; 6]) -> Result<Self> {
        for (criterion, w) in Criterion::ALL.iter().zip(weights) {
            if !w.is_finite() || w <= 0.0 {
                return Err(HabitatError::invalid_weight(
                    criterion.name(),
                    format!("weight must be positive and finite, got {w}"),
                ));
            }
        }
        let total: f64 = weights.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(HabitatError::invalid_weight("all", format!("weights sum to {total}")));
        }
        Ok(Self(weights))
    }

    pub fn from_criteria(criteria: &CriteriaConfig) -> Result<Self> {
        Self::new(Criterion::ALL.map(|c| criteria.get(c).weight))
    }

    pub fn get(&self, criterion: Criterion) -> f64 {
        self.0[criterion.index()]
    }
}

/// Aggregated scores for one band plus its no-data bookkeeping.
#[derive(Debug, Clone)]
pub struct Aggregated {
    pub layer: RasterLayer,
    /// Cells where every sub-score was no-data.
    pub unscored: usize,
    /// Cells scored from a subset of criteria.
    pub partial: usize,
}

/// Weighted mean of the available sub-scores at each cell.
///
/// Missing sub-scores are skipped and the remaining weights renormalised for
/// that cell; a cell with no sub-score at all is no-data, never zero. Terms
/// are summed in [`Criterion::ALL`] order so results do not depend on banding.
pub fn aggregate(subs: &SubScores, weights: &Weights) -> Result<Aggregated> {
    let layers: Vec<(f64, &RasterLayer)> = Criterion::ALL
        .iter()
        .map(|c| {
            subs.get(*c)
                .map(|l| (weights.get(*c), l))
                .ok_or_else(|| HabitatError::MissingLayer(c.input()))
        })
        .collect::<Result<_>>()?;
    for (_, l) in &layers {
        subs.grid.ensure_same(l.grid(), &l.name)?;
    }

    let mut unscored = 0;
    let mut partial = 0;
    let layer = RasterLayer::from_fn("suitability", subs.grid, |r, c| {
        let i = subs.grid.index(r, c);
        let mut sum = 0.0f64;
        let mut wsum = 0.0f64;
        let mut used = 0;
        for (w, l) in &layers {
            if let Some(v) = l.value_at(i) {
                sum += w * f64::from(v);
                wsum += w;
                used += 1;
            }
        }
        if used == 0 {
            unscored += 1;
            return None;
        }
        if used < layers.len() {
            partial += 1;
        }
        Some((sum / wsum).clamp(0.0, 1.0) as f32)
    });

    debug!(row_offset = subs.row_offset, rows = subs.grid.rows, unscored, partial, "aggregated band");
    Ok(Aggregated { layer, unscored, partial })
}
