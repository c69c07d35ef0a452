//! Slope derivation from an elevation model (Horn 1981).
//!
//! Used when no slope layer is supplied. Every cell is computed from its own
//! 3×3 neighbourhood in the full elevation layer, so results do not depend on
//! how a caller later splits the grid into bands.

use crate::raster::RasterLayer;

/// Elevation at `(r + dr, c + dc)`, falling back to `centre` outside the grid
/// or on no-data.
#[inline]
fn neighbour(dem: &RasterLayer, r: usize, c: usize, dr: isize, dc: isize, centre: f64) -> f64 {
    let grid = dem.grid();
    let nr = r as isize + dr;
    let nc = c as isize + dc;
    if nr < 0 || nc < 0 || nr as usize >= grid.rows || nc as usize >= grid.cols {
        return centre;
    }
    dem.value(nr as usize, nc as usize).map_or(centre, f64::from)
}

/// Horn weighted 3×3 gradient at `(r, c)`.
///
/// ```text
///   NW(-1,-1)  N(-1, 0)  NE(-1,+1)
///   W ( 0,-1)  *         E ( 0,+1)
///   SW(+1,-1)  S(+1, 0)  SE(+1,+1)
/// ```
///
/// `dz/dx = ((NE + 2E + SE) − (NW + 2W + SW)) / (8 · cellsize)`
/// `dz/dy = ((NW + 2N + NE) − (SW + 2S + SE)) / (8 · cellsize)`
pub fn horn_gradient(dem: &RasterLayer, r: usize, c: usize, cellsize: f64) -> Option<(f64, f64)> {
    let centre = f64::from(dem.value(r, c)?);
    let z = |dr, dc| neighbour(dem, r, c, dr, dc, centre);

    let (nw, n, ne) = (z(-1, -1), z(-1, 0), z(-1, 1));
    let (w, e) = (z(0, -1), z(0, 1));
    let (sw, s, se) = (z(1, -1), z(1, 0), z(1, 1));

    let dz_dx = ((ne + 2.0 * e + se) - (nw + 2.0 * w + sw)) / (8.0 * cellsize);
    let dz_dy = ((nw + 2.0 * n + ne) - (sw + 2.0 * s + se)) / (8.0 * cellsize);
    Some((dz_dx, dz_dy))
}

/// Slope in degrees for every cell of `dem`. No-data elevation stays no-data.
pub fn derive_slope(dem: &RasterLayer) -> RasterLayer {
    let grid = *dem.grid();
    let cellsize = grid.cell_size_m();
    RasterLayer::from_fn("slope", grid, |r, c| {
        horn_gradient(dem, r, c, cellsize).map(|(dx, dy)| {
            let slope_rad = (dx * dx + dy * dy).sqrt().atan();
            slope_rad.to_degrees().max(0.0) as f32
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::grid::Grid;
    use approx::assert_abs_diff_eq;

    /// Planar ramp rising eastwards at `target_deg`.
    fn ramp(n: usize, cellsize: f64, target_deg: f64) -> RasterLayer {
        let grid = Grid::new(2_700_000.0, 1_200_000.0, cellsize, n, n, Crs::Lv95).unwrap();
        let rise = cellsize * target_deg.to_radians().tan();
        RasterLayer::from_fn("dem", grid, |_, c| Some((c as f64 * rise) as f32))
    }

    #[test]
    fn ramp_interior_matches_target_angle() {
        let slope = derive_slope(&ramp(16, 10.0, 25.0));
        for r in 1..15 {
            for c in 1..15 {
                assert_abs_diff_eq!(slope.value(r, c).unwrap(), 25.0, epsilon = 0.05);
            }
        }
    }

    #[test]
    fn flat_field_has_zero_slope_everywhere() {
        let grid = Grid::new(0.0, 0.0, 10.0, 8, 8, Crs::Lv95).unwrap();
        let dem = RasterLayer::from_fn("dem", grid, |_, _| Some(1500.0));
        let slope = derive_slope(&dem);
        assert!(slope.values().all(|v| v == Some(0.0)));
    }

    #[test]
    fn nodata_elevation_stays_nodata_and_does_not_poison_neighbours() {
        let grid = Grid::new(0.0, 0.0, 10.0, 5, 5, Crs::Lv95).unwrap();
        let dem = RasterLayer::from_fn("dem", grid, |r, c| (r != 2 || c != 2).then_some(800.0));
        let slope = derive_slope(&dem);
        assert_eq!(slope.value(2, 2), None);
        assert_eq!(slope.value(2, 1), Some(0.0));
        assert_eq!(slope.valid_count(), 24);
    }

    #[test]
    fn edge_cells_are_scored() {
        let slope = derive_slope(&ramp(6, 10.0, 20.0));
        assert_eq!(slope.valid_count(), 36);
        let edge = slope.value(0, 0).unwrap();
        assert!(edge > 0.0 && edge < 20.0, "edge slope {edge}");
    }
}
