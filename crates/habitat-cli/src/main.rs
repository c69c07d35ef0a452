//! Command-line runner for the habitat suitability pipeline.
//!
//! Reads input layers from a directory of `<layer>.tif` files (or generates a
//! synthetic scene), scores them, and writes the overlay artifacts consumed by
//! the web map.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use habitat_core::crs::LatLon;
use habitat_core::geotiff::read_geotiff;
use habitat_core::{
    Crs, GeoTiffSource, Grid, HabitatConfig, HabitatPipeline, LayerCache, LayerKind, RasterSource,
    SyntheticScene,
};

/// Map centre of the original study area (Graubünden).
const STUDY_CENTRE: LatLon = LatLon { lat: 46.65, lon: 9.6 };

#[derive(Parser, Debug)]
#[command(name = "habitat", about = "Wolf habitat suitability overlays")]
struct Args {
    /// JSON configuration file; built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding `<layer>.tif` inputs (landcover, elevation, ...).
    #[arg(short, long, conflicts_with = "synthetic")]
    layers_dir: Option<PathBuf>,

    /// Generate a synthetic scene instead of reading layers.
    #[arg(long)]
    synthetic: bool,

    /// Seed for `--synthetic`.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Synthetic grid rows.
    #[arg(long, default_value_t = 400)]
    rows: usize,

    /// Synthetic grid columns.
    #[arg(long, default_value_t = 600)]
    cols: usize,

    /// Target cell size in metres; the elevation layer's own grid when omitted.
    #[arg(long)]
    cell_size: Option<f64>,

    /// Output directory for overlays and report.json.
    #[arg(short, long, default_value = "web_data")]
    output: PathBuf,

    /// Override scenario.core_threshold.
    #[arg(long)]
    core_threshold: Option<f64>,

    /// Override tile_rows (process in horizontal bands).
    #[arg(long)]
    tile_rows: Option<usize>,

    /// Also write the suitability score as a GeoTIFF to this path.
    #[arg(long)]
    geotiff: Option<PathBuf>,

    /// Log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &Args) -> Result<HabitatConfig> {
    let mut config = match &args.config {
        Some(path) => HabitatConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => HabitatConfig::default(),
    };
    if let Some(t) = args.core_threshold {
        config.scenario.core_threshold = t;
    }
    if let Some(rows) = args.tile_rows {
        config.tile_rows = Some(rows);
    }
    config.validate().context("Invalid configuration after CLI overrides")?;
    Ok(config)
}

/// LV95 grid of `rows × cols` cells of `cell_size` metres centred on the study area.
fn synthetic_grid(rows: usize, cols: usize, cell_size: f64) -> Result<Grid> {
    let (cx, cy) = Crs::Lv95.from_wgs84(STUDY_CENTRE);
    let origin_x = (cx - cols as f64 * cell_size / 2.0).round();
    let origin_y = (cy + rows as f64 * cell_size / 2.0).round();
    Ok(Grid::new(origin_x, origin_y, cell_size, rows, cols, Crs::Lv95)?)
}

/// Target grid for a layer directory: the elevation grid, optionally at another cell size.
fn reference_grid(sources: &[GeoTiffSource], cell_size: Option<f64>) -> Result<Grid> {
    let Some(elevation) = sources.iter().find(|s| s.kind() == LayerKind::Elevation) else {
        bail!("No elevation.tif found; it defines the reference grid");
    };
    let layer = read_geotiff(elevation.path())
        .with_context(|| format!("Failed to read {}", elevation.path().display()))?;
    let grid = *layer.grid();
    match cell_size {
        Some(size) => Ok(grid.with_cell_size(size)?),
        None => Ok(grid),
    }
}

fn run(args: &Args) -> Result<()> {
    let config = load_config(args)?;
    let pipeline = HabitatPipeline::new(config)?;
    let mut cache = LayerCache::new();

    let outputs = if args.synthetic {
        let grid = synthetic_grid(args.rows, args.cols, args.cell_size.unwrap_or(25.0))?;
        info!(seed = args.seed, rows = grid.rows, cols = grid.cols, "generating synthetic scene");
        let scene = SyntheticScene::generate(args.seed, grid);
        let sources = scene.sources();
        let refs: Vec<&dyn RasterSource> = sources.iter().map(|s| s as &dyn RasterSource).collect();
        pipeline.run_sources(&refs, &grid, &mut cache)?
    } else if let Some(dir) = &args.layers_dir {
        let sources = GeoTiffSource::discover(dir)
            .with_context(|| format!("Failed to scan {}", dir.display()))?;
        let grid = reference_grid(&sources, args.cell_size)?;
        info!(dir = %dir.display(), layers = sources.len(), cell_size = grid.cell_size, "reading layers");
        let refs: Vec<&dyn RasterSource> = sources.iter().map(|s| s as &dyn RasterSource).collect();
        pipeline.run_sources(&refs, &grid, &mut cache)?
    } else {
        bail!("Either --layers-dir or --synthetic is required. Use --help for usage.");
    };

    let report = pipeline
        .export(&outputs, &args.output)
        .with_context(|| format!("Failed to write overlays to {}", args.output.display()))?;
    if let Some(path) = &args.geotiff {
        pipeline
            .export_geotiff(&outputs, path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    print_summary(&report, &args.output)?;
    Ok(())
}

fn print_summary(report: &habitat_core::RunReport, dir: &Path) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&report.scenarios)?);
    println!(
        "conflicts: {} medium, {} high; {} artifacts in {}",
        report.conflicts.medium,
        report.conflicts.high,
        report.artifacts.len(),
        dir.display()
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.json_logs);
    run(&args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_grid_is_centred_on_study_area() {
        let grid = synthetic_grid(200, 300, 25.0).unwrap();
        let e = grid.extent();
        let centre = grid.crs.to_wgs84((e.min_x + e.max_x) / 2.0, (e.min_y + e.max_y) / 2.0);
        assert!((centre.lat - STUDY_CENTRE.lat).abs() < 0.01, "{centre:?}");
        assert!((centre.lon - STUDY_CENTRE.lon).abs() < 0.01, "{centre:?}");
    }

    #[test]
    fn cli_overrides_replace_config_values() {
        let args = Args::try_parse_from(["habitat", "--synthetic", "--core-threshold", "0.7", "--tile-rows", "32"])
            .unwrap();
        let config = load_config(&args).unwrap();
        assert_eq!(config.scenario.core_threshold, 0.7);
        assert_eq!(config.tile_rows, Some(32));
    }

    #[test]
    fn out_of_range_override_is_rejected() {
        let args = Args::try_parse_from(["habitat", "--synthetic", "--core-threshold", "1.5"]).unwrap();
        assert!(load_config(&args).is_err());
    }

    #[test]
    fn layers_dir_and_synthetic_conflict() {
        assert!(Args::try_parse_from(["habitat", "--synthetic", "--layers-dir", "x"]).is_err());
    }

    #[test]
    fn synthetic_run_writes_web_data() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("web_data");
        let tif = dir.path().join("score.tif");
        let args = Args::try_parse_from([
            "habitat",
            "--synthetic",
            "--rows",
            "30",
            "--cols",
            "40",
            "--output",
            out.to_str().unwrap(),
            "--geotiff",
            tif.to_str().unwrap(),
        ])
        .unwrap();
        run(&args).unwrap();
        assert!(out.join("habitat_overlay.png").is_file());
        assert!(out.join("scenario_human_bounds.json").is_file());
        assert!(out.join("report.json").is_file());
        assert_eq!(read_geotiff(&tif).unwrap().grid().rows, 30);
    }

    #[test]
    fn layer_dir_without_elevation_fails() {
        let dir = tempfile::tempdir().unwrap();
        let sources = GeoTiffSource::discover(dir.path()).unwrap();
        assert!(reference_grid(&sources, None).is_err());
    }
}
