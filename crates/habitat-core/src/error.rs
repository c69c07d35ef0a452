//! Error types for the habitat engine.
//!
//! Ingest and configuration failures abort the whole run. Per-cell no-data is
//! not an error; see [`crate::pipeline::PipelineWarning`].

use thiserror::Error;

use crate::ingest::LayerKind;

/// Errors raised by the suitability engine.
#[derive(Debug, Error)]
pub enum HabitatError {
    /// A required input layer was not supplied.
    #[error("missing required layer: {0}")]
    MissingLayer(LayerKind),

    /// Two rasters do not share a grid, or a source cannot be brought onto the target grid.
    #[error("grid mismatch for '{layer}': {reason}")]
    GridMismatch { layer: String, reason: String },

    /// Criterion weights are unusable (non-positive, non-finite or all zero).
    #[error("invalid weight for {criterion}: {reason}")]
    InvalidWeight { criterion: String, reason: String },

    /// A configuration value is outside its accepted range.
    #[error("invalid configuration '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    /// A suitability raster holds a value outside [0, 1].
    #[error("suitability value {value} at ({row}, {col}) is outside [0, 1]")]
    InvalidScore { row: usize, col: usize, value: f32 },

    #[error("GeoTIFF error: {0}")]
    GeoTiff(String),

    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HabitatError {
    pub fn grid_mismatch(layer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::GridMismatch {
            layer: layer.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_weight(criterion: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidWeight {
            criterion: criterion.into(),
            reason: reason.into(),
        }
    }
}

impl From<tiff::TiffError> for HabitatError {
    fn from(err: tiff::TiffError) -> Self {
        Self::GeoTiff(err.to_string())
    }
}

/// Result type for habitat engine operations.
pub type Result<T> = std::result::Result<T, HabitatError>;
