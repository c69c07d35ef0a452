//! Coordinate reference systems understood by the engine.
//!
//! Grids are planar; the only thing the engine needs from a CRS is a way to
//! express grid corners as WGS84 latitude/longitude for overlay bounds, and
//! the exact translation between the two Swiss frames.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Equatorial radius used by spherical Web Mercator (metres).
const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

/// LV95 false origin relative to LV03 (metres).
const LV95_FALSE_EASTING_SHIFT: f64 = 2_000_000.0;
const LV95_FALSE_NORTHING_SHIFT: f64 = 1_000_000.0;

/// A point in geographic coordinates (degrees).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Supported coordinate reference systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Crs {
    /// WGS84 geographic; x = longitude, y = latitude.
    Wgs84,
    /// Swiss CH1903+/LV95, metres.
    Lv95,
    /// Swiss CH1903/LV03, metres.
    Lv03,
    /// Spherical Web Mercator, metres.
    WebMercator,
}

impl Crs {
    pub fn epsg(self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::Lv95 => 2056,
            Crs::Lv03 => 21781,
            Crs::WebMercator => 3857,
        }
    }

    pub fn from_epsg(code: u32) -> Option<Self> {
        match code {
            4326 => Some(Crs::Wgs84),
            2056 => Some(Crs::Lv95),
            21781 => Some(Crs::Lv03),
            3857 | 900913 => Some(Crs::WebMercator),
            _ => None,
        }
    }

    /// True when coordinates are degrees rather than metres.
    pub fn is_geographic(self) -> bool {
        matches!(self, Crs::Wgs84)
    }

    /// Convert a planar `(x, y)` in this CRS to WGS84.
    ///
    /// The Swiss frames use swisstopo's approximate formulas (accuracy ≈ 1 m),
    /// which is far below the cell size of any overlay.
    pub fn to_wgs84(self, x: f64, y: f64) -> LatLon {
        match self {
            Crs::Wgs84 => LatLon::new(y, x),
            Crs::Lv95 => swiss_to_wgs84(x - 2_600_000.0, y - 1_200_000.0),
            Crs::Lv03 => swiss_to_wgs84(x - 600_000.0, y - 200_000.0),
            Crs::WebMercator => {
                let lon = (x / WEB_MERCATOR_RADIUS).to_degrees();
                let lat = (y / WEB_MERCATOR_RADIUS).sinh().atan().to_degrees();
                LatLon::new(lat, lon)
            }
        }
    }

    /// Convert WGS84 to a planar `(x, y)` in this CRS.
    pub fn from_wgs84(self, ll: LatLon) -> (f64, f64) {
        match self {
            Crs::Wgs84 => (ll.lon, ll.lat),
            Crs::Lv95 => {
                let (e, n) = wgs84_to_swiss(ll);
                (e + 2_600_000.0, n + 1_200_000.0)
            }
            Crs::Lv03 => {
                let (e, n) = wgs84_to_swiss(ll);
                (e + 600_000.0, n + 200_000.0)
            }
            Crs::WebMercator => {
                let x = ll.lon.to_radians() * WEB_MERCATOR_RADIUS;
                let y = (std::f64::consts::FRAC_PI_4 + ll.lat.to_radians() / 2.0).tan().ln()
                    * WEB_MERCATOR_RADIUS;
                (x, y)
            }
        }
    }

    /// Exact planar offset `(dx, dy)` that maps coordinates in `self` to `target`,
    /// or `None` when the two frames are not related by a pure translation.
    pub fn translation_to(self, target: Crs) -> Option<(f64, f64)> {
        match (self, target) {
            (a, b) if a == b => Some((0.0, 0.0)),
            (Crs::Lv03, Crs::Lv95) => Some((LV95_FALSE_EASTING_SHIFT, LV95_FALSE_NORTHING_SHIFT)),
            (Crs::Lv95, Crs::Lv03) => {
                Some((-LV95_FALSE_EASTING_SHIFT, -LV95_FALSE_NORTHING_SHIFT))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

/// swisstopo approximate inverse. `e`, `n` are offsets from the Bern origin in metres.
fn swiss_to_wgs84(e: f64, n: f64) -> LatLon {
    let y = e / 1_000_000.0;
    let x = n / 1_000_000.0;

    let lon_10000s = 2.677_909_4 + 4.728_982 * y + 0.791_484 * y * x + 0.130_6 * y * x * x
        - 0.043_6 * y * y * y;
    let lat_10000s = 16.902_389_2 + 3.238_272 * x
        - 0.270_978 * y * y
        - 0.002_528 * x * x
        - 0.044_7 * y * y * x
        - 0.014_0 * x * x * x;

    // Units are 10000" → degrees.
    LatLon::new(lat_10000s * 100.0 / 36.0, lon_10000s * 100.0 / 36.0)
}

/// swisstopo approximate forward. Returns offsets from the Bern origin in metres.
fn wgs84_to_swiss(ll: LatLon) -> (f64, f64) {
    let phi = (ll.lat * 3600.0 - 169_028.66) / 10_000.0;
    let lam = (ll.lon * 3600.0 - 26_782.5) / 10_000.0;

    let e = 72.37 + 211_455.93 * lam
        - 10_938.51 * lam * phi
        - 0.36 * lam * phi * phi
        - 44.54 * lam * lam * lam;
    let n = 147.07 + 308_807.95 * phi + 3_745.25 * lam * lam + 76.63 * phi * phi
        - 194.56 * lam * lam * phi
        + 119.79 * phi * phi * phi;
    (e, n)
}
