//! Overlay export: colour-mapped RGBA images plus WGS84 bounds for map clients.
//!
//! Every artifact is a pair `<name>.png` + `<name>_bounds.json`, the bounds
//! file holding `[[south, west], [north, east]]`. No-data and excluded cells
//! are fully transparent so overlays stack over a base map.

use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::{ImageFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::conflict::ConflictLayer;
use crate::error::{HabitatError, Result};
use crate::grid::{GeoBounds, Grid};
use crate::raster::{RasterLayer, SuitabilityScore};
use crate::scenario::ScenarioMask;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

// ── Colours ───────────────────────────────────────────────────────────────────

/// RGBA colour written as `#rrggbb` or `#rrggbbaa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexColor(pub [u8; 4]);

impl HexColor {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b, 255])
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self([r, g, b, a])
    }

    pub fn to_rgba(self) -> Rgba<u8> {
        Rgba(self.0)
    }

    /// Linear blend towards `other`; `t` is clamped to [0, 1].
    pub fn lerp(self, other: HexColor, t: f64) -> HexColor {
        let t = t.clamp(0.0, 1.0);
        let mut out = [0u8; 4];
        for (i, o) in out.iter_mut().enumerate() {
            let a = f64::from(self.0[i]);
            let b = f64::from(other.0[i]);
            *o = (a + (b - a) * t).round() as u8;
        }
        HexColor(out)
    }
}

impl FromStr for HexColor {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let hex = s.strip_prefix('#').unwrap_or(s);
        if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
            return Err(format!("expected #rrggbb or #rrggbbaa, got '{s}'"));
        }
        let byte = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| format!("invalid hex colour '{s}'"))
        };
        let alpha = if hex.len() == 8 { byte(6)? } else { 255 };
        Ok(Self([byte(0)?, byte(2)?, byte(4)?, alpha]))
    }
}

impl TryFrom<String> for HexColor {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<HexColor> for String {
    fn from(c: HexColor) -> Self {
        c.to_string()
    }
}

impl fmt::Display for HexColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.0;
        if a == 255 {
            write!(f, "#{r:02x}{g:02x}{b:02x}")
        } else {
            write!(f, "#{r:02x}{g:02x}{b:02x}{a:02x}")
        }
    }
}

// ── Colormaps ─────────────────────────────────────────────────────────────────

/// Mapping from a cell value to a colour.
#[derive(Debug, Clone, PartialEq)]
pub enum Colormap {
    /// Equally spaced stops over `clamp`; values outside are pinned to the ends.
    Continuous { stops: Vec<HexColor>, clamp: [f64; 2] },
    /// Exact category → colour; unlisted categories are transparent.
    Discrete { entries: Vec<(i32, HexColor)> },
}

impl Colormap {
    pub fn continuous(stops: Vec<HexColor>, clamp: [f64; 2]) -> Result<Self> {
        let [lo, hi] = clamp;
        if stops.len() < 2 {
            return Err(HabitatError::invalid_config("colormap.stops", "need at least two stops"));
        }
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(HabitatError::invalid_config(
                "colormap.clamp",
                format!("need low < high, got [{lo}, {hi}]"),
            ));
        }
        Ok(Colormap::Continuous { stops, clamp })
    }

    /// One colour for a single category.
    pub fn single(category: i32, color: HexColor) -> Self {
        Colormap::Discrete { entries: vec![(category, color)] }
    }

    /// Colour of `value`; `None` (no-data) is transparent.
    pub fn color(&self, value: Option<f32>) -> Rgba<u8> {
        let Some(v) = value else { return TRANSPARENT };
        match self {
            Colormap::Continuous { stops, clamp: [lo, hi] } => {
                let t = ((f64::from(v) - lo) / (hi - lo)).clamp(0.0, 1.0);
                let segments = stops.len().saturating_sub(1);
                if segments == 0 {
                    return stops.first().map_or(TRANSPARENT, |c| c.to_rgba());
                }
                let pos = t * segments as f64;
                let i = (pos.floor() as usize).min(segments - 1);
                stops[i].lerp(stops[i + 1], pos - i as f64).to_rgba()
            }
            Colormap::Discrete { entries } => entries
                .iter()
                .find(|(cat, _)| *cat as f32 == v)
                .map_or(TRANSPARENT, |(_, c)| c.to_rgba()),
        }
    }
}

// ── Overlay sources ───────────────────────────────────────────────────────────

/// Anything that can be painted cell by cell.
pub trait OverlaySource {
    fn grid(&self) -> &Grid;

    /// Value fed to the colormap; `None` is transparent.
    fn overlay_value(&self, row: usize, col: usize) -> Option<f32>;
}

impl OverlaySource for RasterLayer {
    fn grid(&self) -> &Grid {
        RasterLayer::grid(self)
    }

    fn overlay_value(&self, row: usize, col: usize) -> Option<f32> {
        self.value(row, col)
    }
}

impl OverlaySource for SuitabilityScore {
    fn grid(&self) -> &Grid {
        SuitabilityScore::grid(self)
    }

    fn overlay_value(&self, row: usize, col: usize) -> Option<f32> {
        self.value(row, col)
    }
}

/// Included cells are category 1; excluded cells are transparent.
impl OverlaySource for ScenarioMask {
    fn grid(&self) -> &Grid {
        ScenarioMask::grid(self)
    }

    fn overlay_value(&self, row: usize, col: usize) -> Option<f32> {
        self.contains(row, col).then_some(1.0)
    }
}

/// Categories follow [`crate::conflict::ConflictLevel::code`].
impl OverlaySource for ConflictLayer {
    fn grid(&self) -> &Grid {
        ConflictLayer::grid(self)
    }

    fn overlay_value(&self, row: usize, col: usize) -> Option<f32> {
        Some(self.level(row, col).code() as f32)
    }
}

/// Paint `source` into an image, one pixel per cell, row 0 at the top.
pub fn render(source: &dyn OverlaySource, colormap: &Colormap) -> RgbaImage {
    let grid = *source.grid();
    RgbaImage::from_fn(grid.cols as u32, grid.rows as u32, |x, y| {
        colormap.color(source.overlay_value(y as usize, x as usize))
    })
}

// ── Export ────────────────────────────────────────────────────────────────────

/// An exported image + bounds pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayArtifact {
    pub name: String,
    pub image: PathBuf,
    pub bounds_file: PathBuf,
    pub bounds: GeoBounds,
}

/// Write `<dir>/<name>.png` and `<dir>/<name>_bounds.json`.
pub fn export_overlay(
    dir: &Path,
    name: &str,
    source: &dyn OverlaySource,
    colormap: &Colormap,
) -> Result<OverlayArtifact> {
    std::fs::create_dir_all(dir)?;
    let image_path = dir.join(format!("{name}.png"));
    let bounds_path = dir.join(format!("{name}_bounds.json"));

    render(source, colormap).save_with_format(&image_path, ImageFormat::Png)?;
    let bounds = source.grid().geographic_bounds();
    let file = BufWriter::new(File::create(&bounds_path)?);
    serde_json::to_writer(file, &bounds.corner_pairs())?;

    debug!(name, path = %image_path.display(), "overlay written");
    Ok(OverlayArtifact { name: name.to_string(), image: image_path, bounds_file: bounds_path, bounds })
}
