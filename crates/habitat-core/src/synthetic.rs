//! Deterministic synthetic alpine scenes.
//!
//! Elevation is fBm over Perlin noise; everything else is derived from it so
//! the layers are mutually plausible: landcover follows elevation bands,
//! settlements sit in valleys and are joined by roads, and pastures and sheep
//! alpages are patches of the meadow belt.

use noise::{NoiseFn, Perlin};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::grid::Grid;
use crate::ingest::{LayerKind, MemorySource};
use crate::normalize::LandcoverClass;
use crate::raster::RasterLayer;

/// Octave sum of Perlin noise with fixed lacunarity 2.
struct Fbm {
    gain: f64,
    octaves: u32,
    noise: Perlin,
}

impl Fbm {
    fn new(seed: u32, hurst: f64, octaves: u32) -> Self {
        Self { gain: 2f64.powf(-hurst), octaves, noise: Perlin::new(seed) }
    }

    /// Roughly in [-1, 1].
    fn sample(&self, x: f64, y: f64) -> f64 {
        let mut value = 0.0;
        let mut amp = 1.0;
        let mut freq = 1.0;
        let mut norm = 0.0;
        for _ in 0..self.octaves {
            value += amp * self.noise.get([x * freq, y * freq]);
            norm += amp;
            amp *= self.gain;
            freq *= 2.0;
        }
        value / norm * 1.6
    }
}

/// A complete input layer set on one grid.
#[derive(Debug, Clone)]
pub struct SyntheticScene {
    pub grid: Grid,
    pub seed: u64,
    /// Settlement cells as `(row, col)`.
    pub settlements: Vec<(usize, usize)>,
    layers: Vec<(LayerKind, RasterLayer)>,
}

impl SyntheticScene {
    /// Build every required layer (no slope; ingest derives it).
    pub fn generate(seed: u64, grid: Grid) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let base = 4.0 / grid.rows.max(grid.cols) as f64;
        let relief = Fbm::new(seed as u32, 0.8, 6);
        let cover = Fbm::new(seed.wrapping_add(1) as u32, 0.5, 4);
        let patches = Fbm::new(seed.wrapping_add(2) as u32, 0.5, 3);
        let at = |f: &Fbm, r: usize, c: usize| f.sample(c as f64 * base, r as f64 * base);

        let elevation = RasterLayer::from_fn("elevation", grid, |r, c| {
            Some((1700.0 + 1100.0 * at(&relief, r, c)).clamp(300.0, 3400.0) as f32)
        });

        let landcover = RasterLayer::from_fn("landcover", grid, |r, c| {
            let z = elevation.value(r, c)?;
            let n = at(&cover, r, c);
            let class = match z {
                z if z < 600.0 => LandcoverClass::Agriculture,
                z if z < 1800.0 => {
                    if n > 0.2 { LandcoverClass::OpenForest } else { LandcoverClass::Forest }
                }
                z if z < 2200.0 => {
                    if n > 0.0 { LandcoverClass::AlpinePasture } else { LandcoverClass::Shrub }
                }
                z if z < 2700.0 => {
                    if n > 0.3 { LandcoverClass::Rock } else { LandcoverClass::Meadow }
                }
                _ => {
                    if n > 0.0 { LandcoverClass::Glacier } else { LandcoverClass::Rock }
                }
            };
            Some(class.code() as f32)
        });

        // Settlements prefer valley floors; fall back to any cell.
        let count = rng.gen_range(3..=6);
        let mut settlements = Vec::with_capacity(count);
        for _ in 0..count {
            let mut pick = (rng.gen_range(0..grid.rows), rng.gen_range(0..grid.cols));
            for _ in 0..200 {
                if elevation.value(pick.0, pick.1).is_some_and(|z| z < 1200.0) {
                    break;
                }
                pick = (rng.gen_range(0..grid.rows), rng.gen_range(0..grid.cols));
            }
            settlements.push(pick);
        }

        let cell_m = grid.cell_size_m();
        let settlement_distance = RasterLayer::from_fn("settlement_distance", grid, |r, c| {
            let d = settlements
                .iter()
                .map(|&(sr, sc)| cell_distance((r, c), (sr, sc)))
                .fold(f64::INFINITY, f64::min);
            Some((d * cell_m) as f32)
        });
        let road_distance = RasterLayer::from_fn("road_distance", grid, |r, c| {
            let d = settlements
                .windows(2)
                .map(|w| segment_distance((r, c), w[0], w[1]))
                .fold(f64::INFINITY, f64::min);
            Some((d * cell_m) as f32)
        });

        let pasture = RasterLayer::from_fn("pasture", grid, |r, c| {
            let code = landcover.value(r, c)? as i32;
            let open = matches!(
                LandcoverClass::from_code(code),
                Some(LandcoverClass::AlpinePasture | LandcoverClass::Meadow)
            );
            Some(if open { (0.5 + 0.5 * at(&patches, r, c)).clamp(0.0, 1.0) as f32 } else { 0.0 })
        });
        let sheep_alpage = RasterLayer::from_fn("sheep_alpage", grid, |r, c| {
            let grazed = pasture.value(r, c)? > 0.6 && at(&patches, c, r) > 0.1;
            Some(if grazed { 1.0 } else { 0.0 })
        });

        debug!(seed, settlements = settlements.len(), "synthetic scene generated");
        Self {
            grid,
            seed,
            settlements,
            layers: vec![
                (LayerKind::Landcover, landcover),
                (LayerKind::Elevation, elevation),
                (LayerKind::SettlementDistance, settlement_distance),
                (LayerKind::RoadDistance, road_distance),
                (LayerKind::Pasture, pasture),
                (LayerKind::SheepAlpage, sheep_alpage),
            ],
        }
    }

    pub fn layer(&self, kind: LayerKind) -> Option<&RasterLayer> {
        self.layers.iter().find(|(k, _)| *k == kind).map(|(_, l)| l)
    }

    pub fn layers(&self) -> impl Iterator<Item = (LayerKind, &RasterLayer)> {
        self.layers.iter().map(|(k, l)| (*k, l))
    }

    /// One in-memory source per layer, with ids that include the seed.
    pub fn sources(&self) -> Vec<MemorySource> {
        self.layers
            .iter()
            .map(|(kind, layer)| {
                MemorySource::new(*kind, layer.clone())
                    .with_id(format!("synthetic:{}:{}", self.seed, kind.name()))
            })
            .collect()
    }
}

fn cell_distance(a: (usize, usize), b: (usize, usize)) -> f64 {
    let dr = a.0 as f64 - b.0 as f64;
    let dc = a.1 as f64 - b.1 as f64;
    (dr * dr + dc * dc).sqrt()
}

/// Distance in cells from `p` to segment `a`–`b`.
fn segment_distance(p: (usize, usize), a: (usize, usize), b: (usize, usize)) -> f64 {
    let (py, px) = (p.0 as f64, p.1 as f64);
    let (ay, ax) = (a.0 as f64, a.1 as f64);
    let (by, bx) = (b.0 as f64, b.1 as f64);
    let (dy, dx) = (by - ay, bx - ax);
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return cell_distance(p, a);
    }
    let t = (((px - ax) * dx + (py - ay) * dy) / len2).clamp(0.0, 1.0);
    let (qy, qx) = (ay + t * dy, ax + t * dx);
    ((py - qy).powi(2) + (px - qx).powi(2)).sqrt()
}
