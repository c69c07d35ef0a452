//! Pipeline orchestrator: ingest → normalize → aggregate → conflicts → scenarios → export.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::{aggregate, Weights};
use crate::config::HabitatConfig;
use crate::conflict::{detect_conflicts, ConflictLayer, ConflictLevel};
use crate::error::Result;
use crate::geotiff::write_geotiff;
use crate::grid::Grid;
use crate::ingest::{ingest, LayerCache, LayerKind, LayerSet, RasterSource};
use crate::normalize::normalize_band;
use crate::overlay::{export_overlay, Colormap, OverlayArtifact};
use crate::raster::{RasterLayer, SuitabilityScore, DEFAULT_NODATA};
use crate::scenario::{conflict_minimized, core_habitat, ScenarioArea, ScenarioMask};

// ── Artifact names ────────────────────────────────────────────────────────────

pub const HABITAT_OVERLAY: &str = "habitat_overlay";
/// Potential core habitat.
pub const SCENARIO_WOLF: &str = "scenario_wolf";
/// Conflict-minimized core habitat.
pub const SCENARIO_HUMAN: &str = "scenario_human";
pub const CONFLICT_MEDIUM: &str = "conflict_medium";
pub const CONFLICT_HIGH: &str = "conflict_high";
pub const REPORT_FILE: &str = "report.json";

// ── Report ────────────────────────────────────────────────────────────────────

/// Non-fatal conditions recorded during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineWarning {
    /// Cells left unscored or scored from a subset of criteria because inputs were no-data.
    NoDataPropagation { unscored_cells: usize, partial_cells: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConflictCounts {
    pub medium: usize,
    pub high: usize,
}

/// Legend data of one run, written next to the overlays as `report.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub grid: Grid,
    /// `[[south, west], [north, east]]`.
    pub bounds: [[f64; 2]; 2],
    pub scored_cells: usize,
    /// Actual `[min, max]` of the suitability score; `None` if nothing was scored.
    pub score_range: Option<[f32; 2]>,
    pub scenarios: Vec<ScenarioArea>,
    pub conflicts: ConflictCounts,
    pub warnings: Vec<PipelineWarning>,
    pub artifacts: Vec<OverlayArtifact>,
    pub elapsed_ms: u64,
}

/// Every output of one run.
#[derive(Debug, Clone)]
pub struct HabitatOutputs {
    pub score: SuitabilityScore,
    pub core: ScenarioMask,
    pub conflict_minimized: ScenarioMask,
    pub conflicts: ConflictLayer,
    pub report: RunReport,
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

pub struct HabitatPipeline {
    config: HabitatConfig,
    weights: Weights,
}

impl HabitatPipeline {
    /// Validate `config` and prepare a pipeline.
    pub fn new(config: HabitatConfig) -> Result<Self> {
        config.validate()?;
        let weights = Weights::from_criteria(&config.criteria)?;
        Ok(Self { config, weights })
    }

    pub fn config(&self) -> &HabitatConfig {
        &self.config
    }

    /// Ingest `sources` onto `grid` and run every stage.
    pub fn run_sources(
        &self,
        sources: &[&dyn RasterSource],
        grid: &Grid,
        cache: &mut LayerCache,
    ) -> Result<HabitatOutputs> {
        let layers = ingest(sources, grid, cache)?;
        self.run(&layers)
    }

    /// Run every stage on already-aligned layers.
    pub fn run(&self, layers: &LayerSet) -> Result<HabitatOutputs> {
        let start = Instant::now();
        let grid = *layers.grid();

        // ── 1. Normalize + aggregate ────────────────────────────────────────
        let (score, unscored, partial) = self.score(layers)?;
        let scored_cells = score.valid_cells();
        let mut warnings = Vec::new();
        if unscored > 0 || partial > 0 {
            warn!(unscored, partial, "no-data inputs propagated into the suitability score");
            warnings.push(PipelineWarning::NoDataPropagation {
                unscored_cells: unscored,
                partial_cells: partial,
            });
        }
        info!(scored_cells, "suitability scored");

        // ── 2. Conflicts ────────────────────────────────────────────────────
        let conflicts = detect_conflicts(
            &score,
            layers.get(LayerKind::Pasture)?,
            layers.get(LayerKind::SheepAlpage)?,
            &self.config.conflict,
        )?;
        let counts = ConflictCounts {
            medium: conflicts.count(ConflictLevel::Medium),
            high: conflicts.count(ConflictLevel::High),
        };
        info!(medium = counts.medium, high = counts.high, "conflicts classified");

        // ── 3. Scenarios ────────────────────────────────────────────────────
        let scenario = &self.config.scenario;
        let core = core_habitat(&score, scenario.core_threshold);
        let settlement = match scenario.min_settlement_distance_m {
            Some(d) => Some((layers.get(LayerKind::SettlementDistance)?, d)),
            None => None,
        };
        let minimized = conflict_minimized(&core, &conflicts, settlement)?;
        let scenarios = vec![core.area(scored_cells), minimized.area(scored_cells)];
        for s in &scenarios {
            info!(scenario = %s.name, cells = s.cells, area_km2 = s.area_km2, "scenario area");
        }

        let report = RunReport {
            grid,
            bounds: grid.geographic_bounds().corner_pairs(),
            scored_cells,
            score_range: score.min_max().map(|(lo, hi)| [lo, hi]),
            scenarios,
            conflicts: counts,
            warnings,
            artifacts: Vec::new(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        Ok(HabitatOutputs { score, core, conflict_minimized: minimized, conflicts, report })
    }

    /// Suitability over the whole grid, processed in bands of `tile_rows` rows.
    ///
    /// Every cell depends only on its own inputs, so banding never changes a value.
    fn score(&self, layers: &LayerSet) -> Result<(SuitabilityScore, usize, usize)> {
        let grid = *layers.grid();
        let tile = self.config.tile_rows.unwrap_or(grid.rows).clamp(1, grid.rows);
        let mut data = Vec::with_capacity(grid.len());
        let (mut unscored, mut partial) = (0, 0);

        for start in (0..grid.rows).step_by(tile) {
            let rows = start..(start + tile).min(grid.rows);
            let subs = normalize_band(layers, &self.config.criteria, rows)?;
            let band = aggregate(&subs, &self.weights)?;
            unscored += band.unscored;
            partial += band.partial;
            data.extend(band.layer.values().map(|v| v.unwrap_or(DEFAULT_NODATA)));
        }

        let layer = RasterLayer::from_vec("suitability", grid, data, DEFAULT_NODATA)?;
        Ok((SuitabilityScore::new(layer)?, unscored, partial))
    }

    /// Write the five overlays and `report.json` into `dir`.
    pub fn export(&self, outputs: &HabitatOutputs, dir: &Path) -> Result<RunReport> {
        let ov = &self.config.overlay;
        let suitability = Colormap::continuous(ov.suitability_colors.clone(), ov.clamp)?;
        let medium = ConflictLevel::Medium.code();
        let high = ConflictLevel::High.code();

        let artifacts = vec![
            export_overlay(dir, HABITAT_OVERLAY, &outputs.score, &suitability)?,
            export_overlay(dir, SCENARIO_WOLF, &outputs.core, &Colormap::single(1, ov.core_color))?,
            export_overlay(
                dir,
                SCENARIO_HUMAN,
                &outputs.conflict_minimized,
                &Colormap::single(1, ov.conflict_minimized_color),
            )?,
            export_overlay(dir, CONFLICT_MEDIUM, &outputs.conflicts, &Colormap::single(medium, ov.medium_risk_color))?,
            export_overlay(dir, CONFLICT_HIGH, &outputs.conflicts, &Colormap::single(high, ov.high_risk_color))?,
        ];

        let mut report = outputs.report.clone();
        report.artifacts = artifacts;
        let file = BufWriter::new(File::create(dir.join(REPORT_FILE))?);
        serde_json::to_writer_pretty(file, &report)?;
        info!(dir = %dir.display(), artifacts = report.artifacts.len(), "overlays exported");
        Ok(report)
    }

    /// Write the suitability score as a Float32 GeoTIFF.
    pub fn export_geotiff(&self, outputs: &HabitatOutputs, path: &Path) -> Result<()> {
        write_geotiff(path, outputs.score.layer())?;
        info!(path = %path.display(), "suitability GeoTIFF written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::ingest::MemorySource;
    use crate::synthetic::SyntheticScene;

    fn scene_layers(seed: u64) -> LayerSet {
        let grid = Grid::new(2_760_000.0, 1_190_000.0, 25.0, 40, 50, Crs::Lv95).unwrap();
        let scene = SyntheticScene::generate(seed, grid);
        let sources = scene.sources();
        let refs: Vec<&dyn RasterSource> = sources.iter().map(|s| s as &dyn RasterSource).collect();
        ingest(&refs, &grid, &mut LayerCache::new()).unwrap()
    }

    #[test]
    fn repeated_runs_are_identical() {
        let layers = scene_layers(42);
        let pipeline = HabitatPipeline::new(HabitatConfig::default()).unwrap();
        let a = pipeline.run(&layers).unwrap();
        let b = pipeline.run(&layers).unwrap();
        assert_eq!(a.score, b.score);
        assert_eq!(a.core, b.core);
        assert_eq!(a.conflict_minimized, b.conflict_minimized);
        assert_eq!(a.conflicts, b.conflicts);
    }

    #[test]
    fn banded_processing_matches_whole_grid() {
        let layers = scene_layers(9);
        let whole = HabitatPipeline::new(HabitatConfig::default()).unwrap().run(&layers).unwrap();
        for tile in [1, 7, 16, 39] {
            let config = HabitatConfig { tile_rows: Some(tile), ..HabitatConfig::default() };
            let banded = HabitatPipeline::new(config).unwrap().run(&layers).unwrap();
            assert_eq!(banded.score, whole.score, "tile_rows = {tile}");
            assert_eq!(banded.conflicts, whole.conflicts, "tile_rows = {tile}");
        }
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let out = HabitatPipeline::new(HabitatConfig::default())
            .unwrap()
            .run(&scene_layers(3))
            .unwrap();
        let [lo, hi] = out.report.score_range.unwrap();
        assert!((0.0..=1.0).contains(&lo) && (0.0..=1.0).contains(&hi) && lo <= hi);
        assert_eq!(out.report.scored_cells, 2000);
        assert!(out.report.warnings.is_empty());
    }

    #[test]
    fn conflict_minimized_is_subset_of_core() {
        let out = HabitatPipeline::new(HabitatConfig::default())
            .unwrap()
            .run(&scene_layers(17))
            .unwrap();
        let grid = *out.core.grid();
        for i in 0..grid.len() {
            if out.conflict_minimized.contains_at(i) {
                assert!(out.core.contains_at(i));
                assert_eq!(out.conflicts.level_at(i), ConflictLevel::None);
            }
        }
    }

    #[test]
    fn nodata_inputs_become_a_warning_not_an_error() {
        let mut layers = scene_layers(5);
        let grid = *layers.grid();
        // Knock out every input in the first row.
        let kinds: Vec<LayerKind> = layers.iter().map(|(k, _)| k).collect();
        for kind in kinds {
            let src = layers.get(kind).unwrap().clone();
            let holed = RasterLayer::from_fn(kind.name(), grid, |r, c| if r == 0 { None } else { src.value(r, c) });
            layers.insert(kind, holed).unwrap();
        }
        let out = HabitatPipeline::new(HabitatConfig::default()).unwrap().run(&layers).unwrap();
        assert_eq!(
            out.report.warnings,
            vec![PipelineWarning::NoDataPropagation { unscored_cells: grid.cols, partial_cells: 0 }]
        );
        assert_eq!(out.score.value(0, 0), None);
        assert!(!out.core.contains(0, 0));
    }

    #[test]
    fn missing_layer_aborts_the_run() {
        let grid = Grid::new(0.0, 0.0, 10.0, 4, 4, Crs::Lv95).unwrap();
        let only = MemorySource::new(LayerKind::Elevation, RasterLayer::from_fn("e", grid, |_, _| Some(1000.0)));
        let pipeline = HabitatPipeline::new(HabitatConfig::default()).unwrap();
        let err = pipeline.run_sources(&[&only as &dyn RasterSource], &grid, &mut LayerCache::new()).unwrap_err();
        assert!(matches!(err, crate::error::HabitatError::MissingLayer(_)));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let mut config = HabitatConfig::default();
        config.criteria.prey.weight = -1.0;
        assert!(HabitatPipeline::new(config).is_err());
    }

    #[test]
    fn export_writes_all_artifacts_and_report() {
        let pipeline = HabitatPipeline::new(HabitatConfig::default()).unwrap();
        let out = pipeline.run(&scene_layers(1)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let report = pipeline.export(&out, dir.path()).unwrap();
        for name in [HABITAT_OVERLAY, SCENARIO_WOLF, SCENARIO_HUMAN, CONFLICT_MEDIUM, CONFLICT_HIGH] {
            assert!(dir.path().join(format!("{name}.png")).is_file(), "{name}.png");
            assert!(dir.path().join(format!("{name}_bounds.json")).is_file(), "{name}_bounds.json");
        }
        assert_eq!(report.artifacts.len(), 5);
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(REPORT_FILE)).unwrap()).unwrap();
        assert_eq!(json["scenarios"].as_array().unwrap().len(), 2);
        assert_eq!(json["bounds"][0][0].as_f64().unwrap(), report.bounds[0][0]);
    }
}
