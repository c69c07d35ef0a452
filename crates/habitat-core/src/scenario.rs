//! Scenario masks and their areas.

use serde::Serialize;

use crate::conflict::{ConflictLayer, ConflictLevel};
use crate::error::Result;
use crate::grid::Grid;
use crate::raster::{Raster, RasterLayer, SuitabilityScore};

/// A named boolean layer of cells meeting a habitat scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioMask {
    pub name: String,
    mask: Raster<bool>,
}

impl ScenarioMask {
    pub fn new(name: impl Into<String>, mask: Raster<bool>) -> Self {
        Self { name: name.into(), mask }
    }

    pub fn grid(&self) -> &Grid {
        self.mask.grid()
    }

    #[inline]
    pub fn contains(&self, row: usize, col: usize) -> bool {
        *self.mask.get(row, col)
    }

    #[inline]
    pub fn contains_at(&self, i: usize) -> bool {
        self.mask.data()[i]
    }

    pub fn cell_count(&self) -> usize {
        self.mask.data().iter().filter(|b| **b).count()
    }

    /// Area summary; `scored_cells` is the number of cells with a valid score.
    pub fn area(&self, scored_cells: usize) -> ScenarioArea {
        let cells = self.cell_count();
        let cell_area_m2 = self.grid().cell_area_m2();
        let area_m2 = cells as f64 * cell_area_m2;
        ScenarioArea {
            name: self.name.clone(),
            cells,
            cell_area_m2,
            area_m2,
            area_km2: area_m2 / 1e6,
            share_of_scored: if scored_cells == 0 { 0.0 } else { cells as f64 / scored_cells as f64 },
        }
    }
}

/// Reported extent of one scenario.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioArea {
    pub name: String,
    pub cells: usize,
    pub cell_area_m2: f64,
    pub area_m2: f64,
    pub area_km2: f64,
    /// Fraction of scored cells inside the scenario.
    pub share_of_scored: f64,
}

/// Potential core habitat: score strictly above `threshold`.
///
/// The comparison runs in the score's own `f32` precision, so a cell scored
/// exactly at the threshold is excluded.
pub fn core_habitat(score: &SuitabilityScore, threshold: f64) -> ScenarioMask {
    let threshold = threshold as f32;
    let mask = Raster::from_fn(*score.grid(), |r, c| score.value(r, c).is_some_and(|v| v > threshold));
    ScenarioMask::new("potential_core_habitat", mask)
}

/// Core habitat without any livestock conflict.
///
/// With `min_settlement` set, cells must also lie at least that many metres
/// from a settlement; no-data distance excludes the cell.
pub fn conflict_minimized(
    core: &ScenarioMask,
    conflicts: &ConflictLayer,
    min_settlement: Option<(&RasterLayer, f64)>,
) -> Result<ScenarioMask> {
    let grid = *core.grid();
    grid.ensure_same(conflicts.grid(), "conflicts")?;
    if let Some((distance, _)) = min_settlement {
        grid.ensure_same(distance.grid(), &distance.name)?;
    }
    let mask = Raster::from_fn(grid, |r, c| {
        core.contains(r, c)
            && conflicts.level(r, c) == ConflictLevel::None
            && min_settlement.map_or(true, |(distance, min)| {
                distance.value(r, c).is_some_and(|d| d >= min as f32)
            })
    });
    Ok(ScenarioMask::new("conflict_minimized_core_habitat", mask))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use approx::assert_abs_diff_eq;

    fn grid10() -> Grid {
        Grid::new(2_700_000.0, 1_200_000.0, 10.0, 10, 10, Crs::Lv95).unwrap()
    }

    #[test]
    fn area_is_cell_count_times_cell_area() {
        // Exactly 30 cells above 0.6 on a 10 m grid.
        let layer = RasterLayer::from_fn("s", grid10(), |r, _| Some(if r < 3 { 0.9 } else { 0.6 }));
        let score = SuitabilityScore::new(layer).unwrap();
        let mask = core_habitat(&score, 0.6);
        let area = mask.area(score.valid_cells());
        assert_eq!(area.cells, 30);
        assert_abs_diff_eq!(area.area_m2, 3000.0);
        assert_abs_diff_eq!(area.area_km2, 0.003);
        assert_abs_diff_eq!(area.share_of_scored, 0.3);
    }

    #[test]
    fn score_equal_to_threshold_is_not_core() {
        let grid = Grid::new(2_700_000.0, 1_200_000.0, 10.0, 1, 3, Crs::Lv95).unwrap();
        let values = [0.6f32, 0.600_001, 0.599_999];
        let layer = RasterLayer::from_fn("s", grid, |_, c| Some(values[c]));
        let mask = core_habitat(&SuitabilityScore::new(layer).unwrap(), 0.6);
        assert!(!mask.contains(0, 0));
        assert!(mask.contains(0, 1));
        assert!(!mask.contains(0, 2));
    }

    #[test]
    fn nodata_is_never_core() {
        let layer = RasterLayer::from_fn("s", grid10(), |r, c| (r + c > 0).then_some(1.0));
        let score = SuitabilityScore::new(layer).unwrap();
        let mask = core_habitat(&score, 0.6);
        assert!(!mask.contains(0, 0));
        assert_eq!(mask.cell_count(), 99);
    }

    #[test]
    fn conflict_minimized_drops_conflicts_and_near_settlements() {
        let g = grid10();
        let score = SuitabilityScore::new(RasterLayer::from_fn("s", g, |_, _| Some(0.9))).unwrap();
        let core = core_habitat(&score, 0.6);
        let conflicts = ConflictLayer::new(Raster::from_fn(g, |r, _| {
            if r == 0 { ConflictLevel::High } else if r == 1 { ConflictLevel::Medium } else { ConflictLevel::None }
        }));
        let no_buffer = conflict_minimized(&core, &conflicts, None).unwrap();
        assert_eq!(no_buffer.cell_count(), 80);

        let distance = RasterLayer::from_fn("settlement_distance", g, |_, c| Some(c as f32 * 100.0));
        let buffered = conflict_minimized(&core, &conflicts, Some((&distance, 500.0))).unwrap();
        assert_eq!(buffered.cell_count(), 40);
        assert!(buffered.contains(5, 5));
        assert!(!buffered.contains(5, 4));
    }

    #[test]
    fn masks_are_pure_functions_of_inputs() {
        let layer = RasterLayer::from_fn("s", grid10(), |r, c| Some(((r * 7 + c * 3) % 10) as f32 / 10.0));
        let score = SuitabilityScore::new(layer).unwrap();
        assert_eq!(core_habitat(&score, 0.6), core_habitat(&score, 0.6));
    }
}
