//! Raster ingest: load every input layer and align it onto the reference grid.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{HabitatError, Result};
use crate::geotiff::read_geotiff;
use crate::grid::{Grid, GridKey};
use crate::raster::{RasterLayer, DEFAULT_NODATA};
use crate::terrain::derive_slope;

/// Overlaps below this fraction of a source cell are treated as touching edges.
const MIN_OVERLAP: f64 = 1e-9;

// ── Layer kinds ───────────────────────────────────────────────────────────────

/// The input layers the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Land-cover class codes.
    Landcover,
    /// Elevation in metres.
    Elevation,
    /// Slope in degrees; derived from elevation when not supplied.
    Slope,
    /// Distance to the nearest settlement in metres.
    SettlementDistance,
    /// Distance to the nearest road in metres.
    RoadDistance,
    /// Alpine pasture fraction / presence.
    Pasture,
    /// Sheep alpage presence.
    SheepAlpage,
}

impl LayerKind {
    pub const ALL: [LayerKind; 7] = [
        LayerKind::Landcover,
        LayerKind::Elevation,
        LayerKind::Slope,
        LayerKind::SettlementDistance,
        LayerKind::RoadDistance,
        LayerKind::Pasture,
        LayerKind::SheepAlpage,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LayerKind::Landcover => "landcover",
            LayerKind::Elevation => "elevation",
            LayerKind::Slope => "slope",
            LayerKind::SettlementDistance => "settlement_distance",
            LayerKind::RoadDistance => "road_distance",
            LayerKind::Pasture => "pasture",
            LayerKind::SheepAlpage => "sheep_alpage",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Resampling used for this kind unless a source overrides it.
    pub fn default_resampling(self) -> Resampling {
        match self {
            LayerKind::Landcover | LayerKind::SheepAlpage => Resampling::Majority,
            _ => Resampling::AreaAverage,
        }
    }

    /// Slope is the only optional input.
    pub fn is_required(self) -> bool {
        self != LayerKind::Slope
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Layer set ─────────────────────────────────────────────────────────────────

/// Input layers aligned to one grid.
#[derive(Debug, Clone)]
pub struct LayerSet {
    grid: Grid,
    layers: BTreeMap<LayerKind, RasterLayer>,
}

impl LayerSet {
    pub fn new(grid: Grid) -> Self {
        Self { grid, layers: BTreeMap::new() }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Add a layer; it must already be on this set's grid.
    pub fn insert(&mut self, kind: LayerKind, layer: RasterLayer) -> Result<()> {
        self.grid.ensure_same(layer.grid(), kind.name())?;
        self.layers.insert(kind, layer);
        Ok(())
    }

    pub fn get(&self, kind: LayerKind) -> Result<&RasterLayer> {
        self.layers.get(&kind).ok_or(HabitatError::MissingLayer(kind))
    }

    pub fn contains(&self, kind: LayerKind) -> bool {
        self.layers.contains_key(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (LayerKind, &RasterLayer)> {
        self.layers.iter().map(|(k, l)| (*k, l))
    }
}

// ── Resampling ────────────────────────────────────────────────────────────────

/// How source cells are combined into a target cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resampling {
    /// Overlap-weighted mean of valid source cells; for continuous fields.
    AreaAverage,
    /// Source cell containing the target cell centre.
    Nearest,
    /// Value covering the largest area; ties go to the smallest value.
    Majority,
}

/// Range of source indices overlapping fractional index span `[start, end)`.
fn index_span(start: f64, end: f64, n: usize) -> Range<usize> {
    let lo = start.floor().max(0.0);
    let hi = end.ceil().min(n as f64);
    if hi <= lo {
        0..0
    } else {
        lo as usize..hi as usize
    }
}

/// Length of `[start, end)` covered by source index `i`.
#[inline]
fn overlap(start: f64, end: f64, i: usize) -> f64 {
    let i = i as f64;
    (end.min(i + 1.0) - start.max(i)).max(0.0)
}

/// Bring `layer` onto `target`.
///
/// The only reprojection supported is a pure translation between CRSs that
/// share a projection (LV03 ↔ LV95). A layer already on `target` is returned
/// unchanged apart from its sentinel.
pub fn resample(layer: &RasterLayer, target: &Grid, method: Resampling) -> Result<RasterLayer> {
    let mut src = *layer.grid();
    if src.crs != target.crs {
        let (dx, dy) = src.crs.translation_to(target.crs).ok_or_else(|| {
            HabitatError::grid_mismatch(
                &layer.name,
                format!("cannot reproject {} to {}", src.crs, target.crs),
            )
        })?;
        src.origin_x += dx;
        src.origin_y += dy;
        src.crs = target.crs;
    }

    if src.key() == target.key() {
        let data = layer.values().map(|v| v.unwrap_or(DEFAULT_NODATA)).collect();
        return RasterLayer::from_vec(&layer.name, *target, data, DEFAULT_NODATA);
    }
    if !src.extent().intersects(&target.extent()) {
        return Err(HabitatError::grid_mismatch(
            &layer.name,
            "source extent does not overlap the target grid",
        ));
    }
    debug!(layer = %layer.name, ?method, from = src.cell_size, to = target.cell_size, "resampling");

    let value = |r: usize, c: usize| layer.value(r, c);
    let out = RasterLayer::from_fn(&layer.name, *target, |tr, tc| {
        if method == Resampling::Nearest {
            let (x, y) = target.cell_center(tr, tc);
            let (sr, sc) = src.cell_at(x, y)?;
            return value(sr, sc);
        }

        // Target cell bounds as fractional source indices.
        let x0 = (target.origin_x + tc as f64 * target.cell_size - src.origin_x) / src.cell_size;
        let x1 = x0 + target.cell_size / src.cell_size;
        let y0 = (src.origin_y - (target.origin_y - tr as f64 * target.cell_size)) / src.cell_size;
        let y1 = y0 + target.cell_size / src.cell_size;
        let rows = index_span(y0, y1, src.rows);
        let cols = index_span(x0, x1, src.cols);

        let mut sum = 0.0f64;
        let mut weight = 0.0f64;
        let mut tally: Vec<(f32, f64)> = Vec::new();
        for sr in rows {
            let wy = overlap(y0, y1, sr);
            for sc in cols.clone() {
                let w = wy * overlap(x0, x1, sc);
                if w < MIN_OVERLAP {
                    continue;
                }
                let Some(v) = value(sr, sc) else { continue };
                match method {
                    Resampling::Majority => match tally.iter_mut().find(|(tv, _)| *tv == v) {
                        Some((_, tw)) => *tw += w,
                        None => tally.push((v, w)),
                    },
                    _ => {
                        sum += w * f64::from(v);
                        weight += w;
                    }
                }
            }
        }

        match method {
            Resampling::Majority => tally
                .into_iter()
                .fold(None, |best: Option<(f32, f64)>, (v, w)| match best {
                    Some((bv, bw)) if bw > w || (bw == w && bv < v) => Some((bv, bw)),
                    _ => Some((v, w)),
                })
                .map(|(v, _)| v),
            _ => (weight > 0.0).then(|| (sum / weight) as f32),
        }
    });
    Ok(out)
}

// ── Sources ───────────────────────────────────────────────────────────────────

/// A named raster that can be loaded for one input kind.
pub trait RasterSource {
    /// Stable identifier used as the cache key.
    fn id(&self) -> &str;

    fn kind(&self) -> LayerKind;

    /// Load the layer on its native grid.
    fn load(&self) -> Result<RasterLayer>;

    fn resampling(&self) -> Resampling {
        self.kind().default_resampling()
    }
}

/// A GeoTIFF on disk.
#[derive(Debug, Clone)]
pub struct GeoTiffSource {
    id: String,
    kind: LayerKind,
    path: PathBuf,
    resampling: Option<Resampling>,
}

impl GeoTiffSource {
    pub fn new(kind: LayerKind, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self { id: path.display().to_string(), kind, path, resampling: None }
    }

    pub fn with_resampling(mut self, method: Resampling) -> Self {
        self.resampling = Some(method);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Find `<kind>.tif` / `<kind>.tiff` for every layer kind in `dir`.
    pub fn discover(dir: impl AsRef<Path>) -> Result<Vec<Self>> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(HabitatError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("layer directory {} does not exist", dir.display()),
            )));
        }
        let mut found = Vec::new();
        for kind in LayerKind::ALL {
            let hit = ["tif", "tiff"]
                .iter()
                .map(|ext| dir.join(format!("{}.{ext}", kind.name())))
                .find(|p| p.is_file());
            if let Some(path) = hit {
                found.push(Self::new(kind, path));
            }
        }
        Ok(found)
    }
}

impl RasterSource for GeoTiffSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> LayerKind {
        self.kind
    }

    fn load(&self) -> Result<RasterLayer> {
        let mut layer = read_geotiff(&self.path)?;
        layer.name = self.kind.name().to_string();
        Ok(layer)
    }

    fn resampling(&self) -> Resampling {
        self.resampling.unwrap_or_else(|| self.kind.default_resampling())
    }
}

/// An already-built layer, for synthetic scenes and tests.
#[derive(Debug, Clone)]
pub struct MemorySource {
    id: String,
    kind: LayerKind,
    layer: RasterLayer,
}

impl MemorySource {
    pub fn new(kind: LayerKind, layer: RasterLayer) -> Self {
        Self { id: format!("memory:{}", kind.name()), kind, layer }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

impl RasterSource for MemorySource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> LayerKind {
        self.kind
    }

    fn load(&self) -> Result<RasterLayer> {
        Ok(self.layer.clone())
    }
}

// ── Cache ─────────────────────────────────────────────────────────────────────

/// Memo of aligned layers keyed by (source id, target grid).
///
/// Lives for one pipeline run; nothing is ever evicted.
#[derive(Debug, Default)]
pub struct LayerCache {
    entries: HashMap<(String, GridKey), RasterLayer>,
    hits: u64,
    misses: u64,
}

impl LayerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The aligned layer for `source` on `grid`, loading and resampling on a miss.
    pub fn get_or_load(&mut self, source: &dyn RasterSource, grid: &Grid) -> Result<&RasterLayer> {
        match self.entries.entry((source.id().to_string(), grid.key())) {
            Entry::Occupied(e) => {
                self.hits += 1;
                debug!(source = source.id(), "layer cache hit");
                Ok(e.into_mut())
            }
            Entry::Vacant(e) => {
                self.misses += 1;
                let raw = source.load()?;
                Ok(e.insert(resample(&raw, grid, source.resampling())?))
            }
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Ingest ────────────────────────────────────────────────────────────────────

/// Align every source onto `grid`.
///
/// Slope is derived from elevation when no slope source is given. When two
/// sources share a kind the later one wins.
pub fn ingest(sources: &[&dyn RasterSource], grid: &Grid, cache: &mut LayerCache) -> Result<LayerSet> {
    let mut set = LayerSet::new(*grid);
    for source in sources {
        let layer = cache.get_or_load(*source, grid)?.clone();
        set.insert(source.kind(), layer)?;
    }

    if !set.contains(LayerKind::Slope) {
        let slope = derive_slope(set.get(LayerKind::Elevation)?);
        info!("slope derived from elevation");
        set.insert(LayerKind::Slope, slope)?;
    }
    for kind in LayerKind::ALL {
        if kind.is_required() && !set.contains(kind) {
            return Err(HabitatError::MissingLayer(kind));
        }
    }

    info!(
        layers = set.layers.len(),
        cache_hits = cache.hits(),
        cache_misses = cache.misses(),
        "ingest complete"
    );
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;

    fn grid(cell: f64, n: usize) -> Grid {
        Grid::new(2_700_000.0, 1_200_000.0, cell, n, n, Crs::Lv95).unwrap()
    }

    fn layer(g: Grid, f: impl FnMut(usize, usize) -> Option<f32>) -> RasterLayer {
        RasterLayer::from_fn("src", g, f)
    }

    #[test]
    fn area_average_halves_resolution_and_skips_nodata() {
        let src = layer(grid(10.0, 4), |r, c| {
            if (r, c) == (0, 0) {
                None
            } else {
                Some((r * 4 + c) as f32)
            }
        });
        let out = resample(&src, &grid(20.0, 2), Resampling::AreaAverage).unwrap();
        // (1 + 4 + 5) / 3, the no-data corner does not count as zero.
        assert!((out.value(0, 0).unwrap() - 10.0 / 3.0).abs() < 1e-5);
        assert_eq!(out.value(1, 1), Some((10.0 + 11.0 + 14.0 + 15.0) / 4.0));
    }

    #[test]
    fn all_nodata_block_stays_nodata() {
        let src = layer(grid(10.0, 4), |r, c| (r >= 2 || c >= 2).then_some(1.0));
        let out = resample(&src, &grid(20.0, 2), Resampling::AreaAverage).unwrap();
        assert_eq!(out.value(0, 0), None);
        assert_eq!(out.raw()[0], DEFAULT_NODATA);
    }

    #[test]
    fn majority_breaks_ties_by_smallest_value() {
        let src = layer(grid(10.0, 2), |r, _| Some(if r == 0 { 7.0 } else { 3.0 }));
        let out = resample(&src, &grid(20.0, 1), Resampling::Majority).unwrap();
        assert_eq!(out.value(0, 0), Some(3.0));

        let src = layer(grid(10.0, 2), |r, c| Some(if (r, c) == (1, 1) { 3.0 } else { 7.0 }));
        let out = resample(&src, &grid(20.0, 1), Resampling::Majority).unwrap();
        assert_eq!(out.value(0, 0), Some(7.0));
    }

    #[test]
    fn nearest_upsamples_by_cell_centre() {
        let src = layer(grid(20.0, 2), |r, c| Some((r * 2 + c) as f32));
        let out = resample(&src, &grid(10.0, 4), Resampling::Nearest).unwrap();
        assert_eq!(out.value(0, 0), Some(0.0));
        assert_eq!(out.value(1, 3), Some(1.0));
        assert_eq!(out.value(3, 2), Some(3.0));
    }

    #[test]
    fn lv03_source_is_translated_onto_lv95_grid() {
        let lv03 = Grid::new(700_000.0, 200_000.0, 10.0, 3, 3, Crs::Lv03).unwrap();
        let src = layer(lv03, |r, c| Some((r * 3 + c) as f32));
        let out = resample(&src, &grid(10.0, 3), Resampling::Nearest).unwrap();
        assert_eq!(out.raw(), src.raw());
    }

    #[test]
    fn unrelated_crs_is_a_grid_mismatch() {
        let wgs = Grid::new(9.5, 46.8, 0.001, 3, 3, Crs::Wgs84).unwrap();
        let src = layer(wgs, |_, _| Some(1.0));
        let err = resample(&src, &grid(10.0, 3), Resampling::AreaAverage).unwrap_err();
        assert!(matches!(err, HabitatError::GridMismatch { .. }));
    }

    #[test]
    fn disjoint_extent_is_a_grid_mismatch() {
        let far = Grid::new(2_800_000.0, 1_100_000.0, 10.0, 3, 3, Crs::Lv95).unwrap();
        let src = layer(far, |_, _| Some(1.0));
        assert!(resample(&src, &grid(10.0, 3), Resampling::AreaAverage).is_err());
    }

    #[test]
    fn cache_hits_on_same_source_and_grid() {
        let g = grid(10.0, 4);
        let source = MemorySource::new(LayerKind::Elevation, layer(grid(5.0, 8), |_, _| Some(900.0)));
        let mut cache = LayerCache::new();
        cache.get_or_load(&source, &g).unwrap();
        let again = cache.get_or_load(&source, &g).unwrap();
        assert_eq!(again.value(2, 2), Some(900.0));
        assert_eq!((cache.hits(), cache.misses()), (1, 1));

        cache.get_or_load(&source, &grid(20.0, 2)).unwrap();
        assert_eq!(cache.misses(), 2);
        assert_eq!(cache.len(), 2);
    }

    fn full_sources(g: Grid) -> Vec<MemorySource> {
        LayerKind::ALL
            .into_iter()
            .filter(|k| *k != LayerKind::Slope)
            .map(|k| MemorySource::new(k, layer(g, |r, _| Some(r as f32 * 10.0))))
            .collect()
    }

    #[test]
    fn ingest_derives_missing_slope() {
        let g = grid(10.0, 4);
        let sources = full_sources(g);
        let refs: Vec<&dyn RasterSource> = sources.iter().map(|s| s as &dyn RasterSource).collect();
        let set = ingest(&refs, &g, &mut LayerCache::new()).unwrap();
        let slope = set.get(LayerKind::Slope).unwrap();
        assert_eq!(slope.valid_count(), 16);
        assert!(slope.value(1, 1).unwrap() > 40.0, "10 m rise per 10 m cell");
    }

    #[test]
    fn ingest_reports_missing_required_layer() {
        let g = grid(10.0, 4);
        let sources: Vec<MemorySource> = full_sources(g)
            .into_iter()
            .filter(|s| s.kind() != LayerKind::SheepAlpage)
            .collect();
        let refs: Vec<&dyn RasterSource> = sources.iter().map(|s| s as &dyn RasterSource).collect();
        let err = ingest(&refs, &g, &mut LayerCache::new()).unwrap_err();
        assert!(matches!(err, HabitatError::MissingLayer(LayerKind::SheepAlpage)));
    }

    #[test]
    fn layer_set_rejects_foreign_grid() {
        let mut set = LayerSet::new(grid(10.0, 4));
        let err = set
            .insert(LayerKind::Pasture, layer(grid(10.0, 5), |_, _| Some(0.0)))
            .unwrap_err();
        assert!(matches!(err, HabitatError::GridMismatch { .. }));
    }

    #[test]
    fn discover_finds_kind_named_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("elevation.tif"), b"").unwrap();
        std::fs::write(dir.path().join("pasture.tiff"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        let found = GeoTiffSource::discover(dir.path()).unwrap();
        let kinds: Vec<LayerKind> = found.iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, vec![LayerKind::Elevation, LayerKind::Pasture]);
    }
}
