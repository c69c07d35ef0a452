/// Downsample a high-resolution elevation GeoTIFF onto a coarser grid.
///
/// Each output cell is the overlap-weighted mean of the valid input cells it
/// covers; cells with no valid input become no-data. Output is Float32 with
/// the no-data value stored in GDAL_NODATA.
///
/// Usage: dem_resample --input swissalti3d_2m.tif --output dem_10m.tif

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use habitat_core::geotiff::{read_geotiff, write_geotiff};
use habitat_core::ingest::{resample, Resampling};
use habitat_core::RasterLayer;

#[derive(Parser, Debug)]
#[command(name = "dem_resample", about = "Area-average a DEM GeoTIFF to a coarser grid")]
struct Args {
    /// Source elevation GeoTIFF.
    #[arg(short, long)]
    input: PathBuf,

    /// Destination GeoTIFF.
    #[arg(short, long)]
    output: PathBuf,

    /// Output cell size in CRS units (metres for LV95).
    #[arg(short, long, default_value_t = 10.0)]
    resolution: f64,

    /// No-data value written to the output.
    #[arg(long, default_value_t = -9999.0, allow_hyphen_values = true)]
    nodata: f32,

    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Area-average `dem` onto a grid with the same origin at `resolution`.
fn downsample(dem: &RasterLayer, resolution: f64, nodata: f32) -> Result<RasterLayer> {
    let target = dem
        .grid()
        .with_cell_size(resolution)
        .context("Invalid output resolution")?;
    let out = resample(dem, &target, Resampling::AreaAverage)?;
    Ok(out.with_sentinel(nodata))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let dem = read_geotiff(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let src = *dem.grid();
    info!(
        rows = src.rows,
        cols = src.cols,
        cell_size = src.cell_size,
        crs = %src.crs,
        "loaded {}",
        args.input.display()
    );

    let out = downsample(&dem, args.resolution, args.nodata)?;
    let dst = *out.grid();
    write_geotiff(&args.output, &out)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    let range = out.min_max().map(|(lo, hi)| format!("{lo:.1}–{hi:.1} m")).unwrap_or_default();
    info!(
        rows = dst.rows,
        cols = dst.cols,
        cell_size = dst.cell_size,
        nodata_cells = out.nodata_count(),
        range = %range,
        "wrote {}",
        args.output.display()
    );
    Ok(())
}
