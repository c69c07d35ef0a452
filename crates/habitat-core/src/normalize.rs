//! Criterion normalizer: raw layers → [0, 1] sub-scores.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CriteriaConfig;
use crate::curves::ResponseCurve;
use crate::error::Result;
use crate::grid::Grid;
use crate::ingest::{LayerKind, LayerSet};
use crate::raster::RasterLayer;

/// The habitat criteria combined into the suitability score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    /// Forest density / shrubland availability.
    Landcover,
    /// Alpine pasture presence as a proxy for wild ungulates.
    Prey,
    Elevation,
    /// Avoidance of cliffs.
    Slope,
    SettlementDistance,
    RoadDistance,
}

impl Criterion {
    /// Fixed evaluation order; aggregation sums in this order.
    pub const ALL: [Criterion; 6] = [
        Criterion::Landcover,
        Criterion::Prey,
        Criterion::Elevation,
        Criterion::Slope,
        Criterion::SettlementDistance,
        Criterion::RoadDistance,
    ];

    /// Position in [`Criterion::ALL`].
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Criterion::Landcover => "landcover",
            Criterion::Prey => "prey",
            Criterion::Elevation => "elevation",
            Criterion::Slope => "slope",
            Criterion::SettlementDistance => "settlement_distance",
            Criterion::RoadDistance => "road_distance",
        }
    }

    /// The input layer this criterion reads.
    pub fn input(self) -> LayerKind {
        match self {
            Criterion::Landcover => LayerKind::Landcover,
            Criterion::Prey => LayerKind::Pasture,
            Criterion::Elevation => LayerKind::Elevation,
            Criterion::Slope => LayerKind::Slope,
            Criterion::SettlementDistance => LayerKind::SettlementDistance,
            Criterion::RoadDistance => LayerKind::RoadDistance,
        }
    }

    /// Whether `curve` has a shape that makes sense for this criterion.
    ///
    /// Distance criteria must never lose suitability as distance grows.
    pub fn accepts(self, curve: &ResponseCurve) -> bool {
        use ResponseCurve as C;
        match self {
            Criterion::Landcover => matches!(curve, C::Categorical { .. } | C::PiecewiseLinear { .. }),
            Criterion::Prey => matches!(
                curve,
                C::Logistic { .. } | C::Step { .. } | C::PiecewiseLinear { .. }
            ),
            Criterion::Elevation => matches!(curve, C::Band { .. } | C::PiecewiseLinear { .. }),
            Criterion::Slope => matches!(curve, C::Taper { .. } | C::PiecewiseLinear { .. }),
            Criterion::SettlementDistance | Criterion::RoadDistance => {
                matches!(curve, C::DistanceDecay { .. } | C::PiecewiseLinear { .. })
                    && curve.is_non_decreasing()
            }
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Simplified land-cover classes of the input landcover raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LandcoverClass {
    Forest,
    OpenForest,
    Shrub,
    Meadow,
    AlpinePasture,
    Agriculture,
    Urban,
    Water,
    Rock,
    Glacier,
}

impl LandcoverClass {
    pub const ALL: [LandcoverClass; 10] = [
        LandcoverClass::Forest,
        LandcoverClass::OpenForest,
        LandcoverClass::Shrub,
        LandcoverClass::Meadow,
        LandcoverClass::AlpinePasture,
        LandcoverClass::Agriculture,
        LandcoverClass::Urban,
        LandcoverClass::Water,
        LandcoverClass::Rock,
        LandcoverClass::Glacier,
    ];

    /// Raster code of the class.
    pub fn code(self) -> i32 {
        match self {
            LandcoverClass::Forest => 1,
            LandcoverClass::OpenForest => 2,
            LandcoverClass::Shrub => 3,
            LandcoverClass::Meadow => 4,
            LandcoverClass::AlpinePasture => 5,
            LandcoverClass::Agriculture => 6,
            LandcoverClass::Urban => 7,
            LandcoverClass::Water => 8,
            LandcoverClass::Rock => 9,
            LandcoverClass::Glacier => 10,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Uncalibrated starting preference: forest and shrub high, rock and built-up near zero.
    pub fn default_preference(self) -> f64 {
        match self {
            LandcoverClass::Forest => 1.0,
            LandcoverClass::Shrub => 0.9,
            LandcoverClass::OpenForest => 0.8,
            LandcoverClass::Meadow => 0.5,
            LandcoverClass::AlpinePasture => 0.5,
            LandcoverClass::Agriculture => 0.3,
            LandcoverClass::Glacier => 0.05,
            LandcoverClass::Rock => 0.05,
            LandcoverClass::Water => 0.0,
            LandcoverClass::Urban => 0.0,
        }
    }
}

/// Per-criterion sub-scores for a band of rows (the whole grid by default).
#[derive(Debug, Clone)]
pub struct SubScores {
    /// Grid of the band these scores cover.
    pub grid: Grid,
    /// First row of the band within the full grid.
    pub row_offset: usize,
    pub layers: Vec<(Criterion, RasterLayer)>,
}

impl SubScores {
    pub fn get(&self, criterion: Criterion) -> Option<&RasterLayer> {
        self.layers.iter().find(|(c, _)| *c == criterion).map(|(_, l)| l)
    }
}

/// Normalize every criterion over the whole grid.
pub fn normalize(layers: &LayerSet, criteria: &CriteriaConfig) -> Result<SubScores> {
    normalize_band(layers, criteria, 0..layers.grid().rows)
}

/// Normalize every criterion for rows `rows` of the full grid.
///
/// No-data in an input stays no-data in that criterion's sub-score.
pub fn normalize_band(
    layers: &LayerSet,
    criteria: &CriteriaConfig,
    rows: Range<usize>,
) -> Result<SubScores> {
    let full = *layers.grid();
    let band = full.band(rows.start, rows.len());
    let mut out = Vec::with_capacity(Criterion::ALL.len());

    for criterion in Criterion::ALL {
        let input = layers.get(criterion.input())?;
        let curve = &criteria.get(criterion).curve;
        let sub = RasterLayer::from_fn(criterion.name(), band, |r, c| {
            input
                .value(rows.start + r, c)
                .map(|v| curve.evaluate(f64::from(v)) as f32)
        });
        debug!(
            criterion = criterion.name(),
            rows = ?rows,
            nodata = sub.nodata_count(),
            "normalized criterion"
        );
        out.push((criterion, sub));
    }

    Ok(SubScores { grid: band, row_offset: rows.start, layers: out })
}
