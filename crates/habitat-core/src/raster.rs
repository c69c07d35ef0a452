//! Grid-aligned raster containers.
//!
//! `Raster<T>` is the plain row-major container. `RasterLayer` adds the
//! explicit no-data sentinel used for every numeric input and derived layer;
//! NaN is treated as no-data as well so arithmetic never launders a hole
//! into a number.

use serde::{Deserialize, Serialize};

use crate::error::{HabitatError, Result};
use crate::grid::Grid;

/// No-data sentinel used for every layer the engine writes.
pub const DEFAULT_NODATA: f32 = -9999.0;

/// A row-major 2D array aligned to a [`Grid`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Raster<T> {
    grid: Grid,
    data: Vec<T>,
}

impl<T> Raster<T> {
    /// Wrap row-major `data`; its length must equal the grid's cell count.
    pub fn from_vec(grid: Grid, data: Vec<T>) -> Result<Self> {
        if data.len() != grid.len() {
            return Err(HabitatError::grid_mismatch(
                "raster",
                format!("{} values for a {}×{} grid", data.len(), grid.rows, grid.cols),
            ));
        }
        Ok(Self { grid, data })
    }

    /// Build a raster by evaluating `f(row, col)` for every cell.
    pub fn from_fn(grid: Grid, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(grid.len());
        for r in 0..grid.rows {
            for c in 0..grid.cols {
                data.push(f(r, c));
            }
        }
        Self { grid, data }
    }

    #[inline]
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    #[inline]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> &T {
        &self.data[self.grid.index(row, col)]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: T) {
        let i = self.grid.index(row, col);
        self.data[i] = val;
    }

    /// Apply `f` cell by cell, producing a raster on the same grid.
    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> Raster<U> {
        Raster { grid: self.grid, data: self.data.iter().map(f).collect() }
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

/// A named numeric layer with an explicit no-data sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterLayer {
    pub name: String,
    pub nodata: f32,
    raster: Raster<f32>,
}

impl RasterLayer {
    pub fn new(name: impl Into<String>, raster: Raster<f32>, nodata: f32) -> Self {
        Self { name: name.into(), nodata, raster }
    }

    pub fn from_vec(name: impl Into<String>, grid: Grid, data: Vec<f32>, nodata: f32) -> Result<Self> {
        Ok(Self::new(name, Raster::from_vec(grid, data)?, nodata))
    }

    /// Build a layer from `f(row, col)`; `None` becomes the default sentinel.
    pub fn from_fn(
        name: impl Into<String>,
        grid: Grid,
        mut f: impl FnMut(usize, usize) -> Option<f32>,
    ) -> Self {
        let raster = Raster::from_fn(grid, |r, c| f(r, c).unwrap_or(DEFAULT_NODATA));
        Self::new(name, raster, DEFAULT_NODATA)
    }

    #[inline]
    pub fn grid(&self) -> &Grid {
        self.raster.grid()
    }

    #[inline]
    pub fn raw(&self) -> &[f32] {
        self.raster.data()
    }

    #[inline]
    pub fn is_nodata(&self, v: f32) -> bool {
        v.is_nan() || v == self.nodata
    }

    /// Value at `(row, col)`, or `None` for no-data.
    #[inline]
    pub fn value(&self, row: usize, col: usize) -> Option<f32> {
        self.value_at(self.grid().index(row, col))
    }

    /// Value at flat index `i`, or `None` for no-data.
    #[inline]
    pub fn value_at(&self, i: usize) -> Option<f32> {
        let v = self.raster.data()[i];
        (!self.is_nodata(v)).then_some(v)
    }

    /// Iterator over every cell as `Option<f32>`.
    pub fn values(&self) -> impl Iterator<Item = Option<f32>> + '_ {
        self.raster.data().iter().map(move |&v| (!self.is_nodata(v)).then_some(v))
    }

    pub fn valid_count(&self) -> usize {
        self.values().filter(Option::is_some).count()
    }

    pub fn nodata_count(&self) -> usize {
        self.grid().len() - self.valid_count()
    }

    /// Minimum and maximum over valid cells, or `None` if every cell is no-data.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        self.values().flatten().fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }

    /// Rewrite every no-data cell to this layer's sentinel (NaN included).
    pub fn with_sentinel(mut self, nodata: f32) -> Self {
        let old = self.nodata;
        self.nodata = nodata;
        let grid = *self.grid();
        let data = self
            .raster
            .into_vec()
            .into_iter()
            .map(|v| if v.is_nan() || v == old { nodata } else { v })
            .collect();
        self.raster = Raster { grid, data };
        self
    }
}

/// A validated suitability layer: every valid cell lies in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct SuitabilityScore(RasterLayer);

impl SuitabilityScore {
    /// Validate `layer` against the [0, 1] invariant.
    pub fn new(layer: RasterLayer) -> Result<Self> {
        let grid = *layer.grid();
        for (i, v) in layer.values().enumerate() {
            if let Some(v) = v {
                if !(0.0..=1.0).contains(&v) {
                    return Err(HabitatError::InvalidScore {
                        row: i / grid.cols,
                        col: i % grid.cols,
                        value: v,
                    });
                }
            }
        }
        Ok(Self(layer))
    }

    pub fn layer(&self) -> &RasterLayer {
        &self.0
    }

    pub fn grid(&self) -> &Grid {
        self.0.grid()
    }

    #[inline]
    pub fn value(&self, row: usize, col: usize) -> Option<f32> {
        self.0.value(row, col)
    }

    #[inline]
    pub fn value_at(&self, i: usize) -> Option<f32> {
        self.0.value_at(i)
    }

    pub fn min_max(&self) -> Option<(f32, f32)> {
        self.0.min_max()
    }

    /// Number of scored (non-no-data) cells.
    pub fn valid_cells(&self) -> usize {
        self.0.valid_count()
    }
}
