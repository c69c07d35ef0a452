//! Wolf habitat suitability engine.
//!
//! Aligns raw input rasters onto one reference grid, scores every cell against
//! weighted habitat criteria, derives scenario masks and livestock conflict
//! levels, and exports colour-mapped overlays with WGS84 bounds for web maps.

pub mod aggregate;
pub mod config;
pub mod conflict;
pub mod crs;
pub mod curves;
pub mod error;
pub mod geotiff;
pub mod grid;
pub mod ingest;
pub mod normalize;
pub mod overlay;
pub mod pipeline;
pub mod raster;
pub mod scenario;
pub mod synthetic;
pub mod terrain;

pub use config::HabitatConfig;
pub use conflict::{ConflictLayer, ConflictLevel};
pub use crs::Crs;
pub use error::{HabitatError, Result};
pub use grid::{GeoBounds, Grid};
pub use ingest::{GeoTiffSource, LayerCache, LayerKind, LayerSet, MemorySource, RasterSource, Resampling};
pub use pipeline::{HabitatOutputs, HabitatPipeline, PipelineWarning, RunReport};
pub use raster::{RasterLayer, SuitabilityScore, DEFAULT_NODATA};
pub use scenario::{ScenarioArea, ScenarioMask};
pub use synthetic::SyntheticScene;
