//! Livestock conflict detection.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ConflictConfig;
use crate::error::Result;
use crate::grid::Grid;
use crate::raster::{Raster, RasterLayer, SuitabilityScore};

/// Ordered conflict risk; a higher level is never downgraded by more risk.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConflictLevel {
    #[default]
    None,
    Medium,
    High,
}

impl ConflictLevel {
    pub const ALL: [ConflictLevel; 3] = [ConflictLevel::None, ConflictLevel::Medium, ConflictLevel::High];

    /// Numeric category used by discrete colormaps.
    pub fn code(self) -> i32 {
        match self {
            ConflictLevel::None => 0,
            ConflictLevel::Medium => 1,
            ConflictLevel::High => 2,
        }
    }
}

impl fmt::Display for ConflictLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConflictLevel::None => "none",
            ConflictLevel::Medium => "medium",
            ConflictLevel::High => "high",
        })
    }
}

/// Per-cell conflict level.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictLayer(Raster<ConflictLevel>);

impl ConflictLayer {
    pub fn new(raster: Raster<ConflictLevel>) -> Self {
        Self(raster)
    }

    pub fn grid(&self) -> &Grid {
        self.0.grid()
    }

    pub fn level(&self, row: usize, col: usize) -> ConflictLevel {
        *self.0.get(row, col)
    }

    pub fn level_at(&self, i: usize) -> ConflictLevel {
        self.0.data()[i]
    }

    pub fn count(&self, level: ConflictLevel) -> usize {
        self.0.data().iter().filter(|l| **l == level).count()
    }
}

/// Conflict level of a single cell.
///
/// Only cells scored above `suitability_threshold` can conflict. A sheep
/// alpage makes the cell `High` whether or not it is also general pasture.
/// Missing inputs count as absent indicators. Thresholds are compared in
/// `f32`, the precision scores and indicators are stored in.
pub fn classify(
    score: Option<f32>,
    pasture: Option<f32>,
    alpage: Option<f32>,
    config: &ConflictConfig,
) -> ConflictLevel {
    let Some(score) = score else {
        return ConflictLevel::None;
    };
    if score <= config.suitability_threshold as f32 {
        return ConflictLevel::None;
    }
    let presence = config.presence_threshold as f32;
    let present = |v: Option<f32>| v.is_some_and(|v| v > presence);
    if present(alpage) {
        ConflictLevel::High
    } else if present(pasture) {
        ConflictLevel::Medium
    } else {
        ConflictLevel::None
    }
}

/// Classify every cell of `score` against the pasture and alpage indicators.
pub fn detect_conflicts(
    score: &SuitabilityScore,
    pasture: &RasterLayer,
    alpage: &RasterLayer,
    config: &ConflictConfig,
) -> Result<ConflictLayer> {
    let grid = *score.grid();
    grid.ensure_same(pasture.grid(), &pasture.name)?;
    grid.ensure_same(alpage.grid(), &alpage.name)?;
    Ok(ConflictLayer(Raster::from_fn(grid, |r, c| {
        classify(score.value(r, c), pasture.value(r, c), alpage.value(r, c), config)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn cfg() -> ConflictConfig {
        ConflictConfig { suitability_threshold: 0.5, presence_threshold: 0.0 }
    }

    #[test]
    fn both_indicators_classify_as_high() {
        assert_eq!(classify(Some(0.8), Some(1.0), Some(1.0), &cfg()), ConflictLevel::High);
        assert_eq!(classify(Some(0.8), None, Some(1.0), &cfg()), ConflictLevel::High);
        assert_eq!(classify(Some(0.8), Some(1.0), Some(0.0), &cfg()), ConflictLevel::Medium);
    }

    #[test]
    fn low_or_missing_suitability_never_conflicts() {
        assert_eq!(classify(Some(0.5), Some(1.0), Some(1.0), &cfg()), ConflictLevel::None);
        assert_eq!(classify(None, Some(1.0), Some(1.0), &cfg()), ConflictLevel::None);
    }

    #[test]
    fn score_equal_to_threshold_is_not_above_it() {
        let at = ConflictConfig { suitability_threshold: 0.6, presence_threshold: 0.0 };
        assert_eq!(classify(Some(0.6), Some(1.0), None, &at), ConflictLevel::None);
        assert_eq!(classify(Some(0.6), Some(1.0), Some(1.0), &at), ConflictLevel::None);
        assert_eq!(classify(Some(0.600_001), Some(1.0), None, &at), ConflictLevel::Medium);
        // An indicator sitting exactly on the presence threshold is absent.
        let presence = ConflictConfig { suitability_threshold: 0.5, presence_threshold: 0.3 };
        assert_eq!(classify(Some(0.9), Some(0.3), Some(0.3), &presence), ConflictLevel::None);
    }

    #[test]
    fn adding_an_indicator_never_downgrades() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let score = Some(rng.gen_range(0.0f32..=1.0));
            let pasture = rng.gen_bool(0.5).then(|| rng.gen_range(0.0f32..2.0));
            let base = classify(score, pasture, None, &cfg());
            let with_alpage = classify(score, pasture, Some(1.0), &cfg());
            let with_pasture = classify(score, Some(1.0), None, &cfg());
            assert!(with_alpage >= base, "{base} -> {with_alpage}");
            assert!(with_pasture >= base, "{base} -> {with_pasture}");
        }
    }

    #[test]
    fn detect_counts_levels_over_grid() {
        let grid = Grid::new(0.0, 0.0, 10.0, 2, 2, Crs::Lv95).unwrap();
        let score = SuitabilityScore::new(RasterLayer::from_fn("s", grid, |_, _| Some(0.9))).unwrap();
        let pasture = RasterLayer::from_fn("pasture", grid, |r, _| Some(if r == 0 { 1.0 } else { 0.0 }));
        let alpage = RasterLayer::from_fn("sheep_alpage", grid, |_, c| (c == 1).then_some(1.0));
        let layer = detect_conflicts(&score, &pasture, &alpage, &cfg()).unwrap();
        assert_eq!(layer.level(0, 0), ConflictLevel::Medium);
        assert_eq!(layer.level(0, 1), ConflictLevel::High);
        assert_eq!(layer.level(1, 0), ConflictLevel::None);
        assert_eq!(layer.count(ConflictLevel::High), 2);
    }

    #[test]
    fn levels_are_ordered() {
        assert!(ConflictLevel::None < ConflictLevel::Medium);
        assert!(ConflictLevel::Medium < ConflictLevel::High);
    }
}
