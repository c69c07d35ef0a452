//! The shared spatial reference every layer and output is aligned to.
//! Coordinate math uses f64; cell values elsewhere use f32.

use serde::{Deserialize, Serialize};

use crate::crs::{Crs, LatLon};
use crate::error::{HabitatError, Result};

/// Metres per degree of latitude, used for geographic grids.
const METRES_PER_DEGREE: f64 = 111_320.0;

/// An immutable, north-up raster grid with square cells.
///
/// `origin_x`/`origin_y` is the outer north-west corner of cell (0, 0).
/// Row 0 is the northernmost row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub origin_x: f64,
    pub origin_y: f64,
    /// Cell edge length in CRS units.
    pub cell_size: f64,
    pub rows: usize,
    pub cols: usize,
    pub crs: Crs,
}

/// Planar extent of a grid in its own CRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn intersects(&self, other: &Extent) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }
}

/// WGS84 bounding box of a grid, as consumed by image-overlay map clients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl GeoBounds {
    /// `[[south, west], [north, east]]`, the south-west / north-east corner pairs.
    pub fn corner_pairs(&self) -> [[f64; 2]; 2] {
        [[self.south, self.west], [self.north, self.east]]
    }
}

/// Hashable identity of a grid; two grids have the same key iff every field is bit-identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridKey {
    origin_x: u64,
    origin_y: u64,
    cell_size: u64,
    rows: usize,
    cols: usize,
    crs: Crs,
}

impl Grid {
    pub fn new(
        origin_x: f64,
        origin_y: f64,
        cell_size: f64,
        rows: usize,
        cols: usize,
        crs: Crs,
    ) -> Result<Self> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(HabitatError::invalid_config(
                "grid.cell_size",
                format!("must be a positive finite number, got {cell_size}"),
            ));
        }
        if rows == 0 || cols == 0 {
            return Err(HabitatError::invalid_config(
                "grid.shape",
                format!("grid must have at least one cell, got {rows}×{cols}"),
            ));
        }
        if !origin_x.is_finite() || !origin_y.is_finite() {
            return Err(HabitatError::invalid_config("grid.origin", "origin must be finite"));
        }
        Ok(Self { origin_x, origin_y, cell_size, rows, cols, crs })
    }

    /// Number of cells.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    pub fn key(&self) -> GridKey {
        GridKey {
            origin_x: self.origin_x.to_bits(),
            origin_y: self.origin_y.to_bits(),
            cell_size: self.cell_size.to_bits(),
            rows: self.rows,
            cols: self.cols,
            crs: self.crs,
        }
    }

    pub fn extent(&self) -> Extent {
        Extent {
            min_x: self.origin_x,
            max_x: self.origin_x + self.cols as f64 * self.cell_size,
            min_y: self.origin_y - self.rows as f64 * self.cell_size,
            max_y: self.origin_y,
        }
    }

    /// The horizontal band of `rows` rows starting at `row_start`.
    pub fn band(&self, row_start: usize, rows: usize) -> Grid {
        Grid {
            origin_y: self.origin_y - row_start as f64 * self.cell_size,
            rows,
            ..*self
        }
    }

    /// Same origin and CRS at `cell_size`, covering at least this grid's extent.
    pub fn with_cell_size(&self, cell_size: f64) -> Result<Grid> {
        let width = self.cols as f64 * self.cell_size;
        let height = self.rows as f64 * self.cell_size;
        // Tolerate float noise so 1000 m / 10 m stays 100 cells, not 101.
        let count = |len: f64| (len / cell_size - 1e-9).ceil().max(1.0) as usize;
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(HabitatError::invalid_config(
                "grid.cell_size",
                format!("must be a positive finite number, got {cell_size}"),
            ));
        }
        Grid::new(self.origin_x, self.origin_y, cell_size, count(height), count(width), self.crs)
    }

    /// Planar centre of cell `(row, col)`.
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.cell_size,
            self.origin_y - (row as f64 + 0.5) * self.cell_size,
        )
    }

    /// Cell containing planar point `(x, y)`, or `None` outside the grid.
    /// Points on the east/south outer edge belong to no cell.
    pub fn cell_at(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let fc = (x - self.origin_x) / self.cell_size;
        let fr = (self.origin_y - y) / self.cell_size;
        if fc < 0.0 || fr < 0.0 {
            return None;
        }
        let (row, col) = (fr.floor() as usize, fc.floor() as usize);
        (row < self.rows && col < self.cols).then_some((row, col))
    }

    /// Ground length of a cell edge in metres.
    ///
    /// Geographic grids use the isotropic approximation at the mid latitude.
    pub fn cell_size_m(&self) -> f64 {
        if self.crs.is_geographic() {
            let e = self.extent();
            let mid_lat = (e.min_y + e.max_y) / 2.0;
            let cy = self.cell_size * METRES_PER_DEGREE;
            let cx = self.cell_size * METRES_PER_DEGREE * mid_lat.to_radians().cos();
            (cy + cx) / 2.0
        } else {
            self.cell_size
        }
    }

    /// Ground area of one cell in square metres.
    pub fn cell_area_m2(&self) -> f64 {
        let s = self.cell_size_m();
        s * s
    }

    /// WGS84 envelope of the four outer grid corners.
    pub fn geographic_bounds(&self) -> GeoBounds {
        let e = self.extent();
        let corners: [LatLon; 4] = [
            self.crs.to_wgs84(e.min_x, e.min_y),
            self.crs.to_wgs84(e.min_x, e.max_y),
            self.crs.to_wgs84(e.max_x, e.min_y),
            self.crs.to_wgs84(e.max_x, e.max_y),
        ];
        let mut b = GeoBounds {
            south: f64::INFINITY,
            west: f64::INFINITY,
            north: f64::NEG_INFINITY,
            east: f64::NEG_INFINITY,
        };
        for c in corners {
            b.south = b.south.min(c.lat);
            b.north = b.north.max(c.lat);
            b.west = b.west.min(c.lon);
            b.east = b.east.max(c.lon);
        }
        b
    }

    /// Fail with `GridMismatch` unless `other` is exactly this grid.
    pub fn ensure_same(&self, other: &Grid, layer: &str) -> Result<()> {
        if self.key() == other.key() {
            return Ok(());
        }
        let reason = if self.crs != other.crs {
            format!("CRS {} differs from {}", other.crs, self.crs)
        } else if self.cell_size != other.cell_size {
            format!("cell size {} differs from {}", other.cell_size, self.cell_size)
        } else {
            format!(
                "extent {}×{} at ({}, {}) differs from {}×{} at ({}, {})",
                other.rows, other.cols, other.origin_x, other.origin_y,
                self.rows, self.cols, self.origin_x, self.origin_y,
            )
        };
        Err(HabitatError::grid_mismatch(layer, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn lv95_grid() -> Grid {
        Grid::new(2_760_000.0, 1_190_000.0, 10.0, 10, 10, Crs::Lv95).unwrap()
    }

    #[test]
    fn cell_center_and_lookup_agree() {
        let g = lv95_grid();
        for (r, c) in [(0, 0), (3, 7), (9, 9)] {
            let (x, y) = g.cell_center(r, c);
            assert_eq!(g.cell_at(x, y), Some((r, c)));
        }
        assert_eq!(g.cell_at(2_759_999.0, 1_189_995.0), None);
        assert_eq!(g.cell_at(2_760_100.0, 1_189_995.0), None, "east edge is outside");
    }

    #[test]
    fn projected_cell_area_is_square_of_cell_size() {
        assert_abs_diff_eq!(lv95_grid().cell_area_m2(), 100.0);
    }

    #[test]
    fn geographic_bounds_are_ordered() {
        let b = lv95_grid().geographic_bounds();
        assert!(b.south < b.north);
        assert!(b.west < b.east);
        // Grid sits in eastern Switzerland.
        assert!(b.south > 46.0 && b.north < 47.5, "lat {b:?}");
        assert!(b.west > 9.0 && b.east < 10.5, "lon {b:?}");
        let [[s, w], [n, e]] = b.corner_pairs();
        assert_eq!((s, w, n, e), (b.south, b.west, b.north, b.east));
    }

    #[test]
    fn mismatched_grids_are_rejected() {
        let a = lv95_grid();
        let mut b = a;
        b.cell_size = 20.0;
        assert!(matches!(a.ensure_same(&b, "slope"), Err(HabitatError::GridMismatch { .. })));
        let mut c = a;
        c.crs = Crs::Lv03;
        assert!(a.ensure_same(&c, "slope").is_err());
        assert!(a.ensure_same(&a, "slope").is_ok());
    }

    #[test]
    fn resized_grid_covers_original_extent() {
        let g = lv95_grid();
        let coarse = g.with_cell_size(30.0).unwrap();
        assert_eq!((coarse.rows, coarse.cols), (4, 4));
        assert_eq!((coarse.origin_x, coarse.origin_y), (g.origin_x, g.origin_y));
        let fine = g.with_cell_size(2.5).unwrap();
        assert_eq!((fine.rows, fine.cols), (40, 40));
        assert!(g.with_cell_size(-1.0).is_err());
    }

    #[test]
    fn invalid_grids_fail_construction() {
        assert!(Grid::new(0.0, 0.0, 0.0, 4, 4, Crs::Lv95).is_err());
        assert!(Grid::new(0.0, 0.0, 10.0, 0, 4, Crs::Lv95).is_err());
        assert!(Grid::new(f64::NAN, 0.0, 10.0, 4, 4, Crs::Lv95).is_err());
    }
}
