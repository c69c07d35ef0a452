//! Response curves mapping a raw physical value to a [0, 1] sub-score.
//!
//! Every curve is a pure function of its parameters; none of them carry
//! hard-coded calibration. Outputs are clamped into [0, 1] so a badly shaped
//! table can never break the suitability invariant downstream.

use serde::{Deserialize, Serialize};

use crate::error::{HabitatError, Result};

/// Score assigned to one categorical class code.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassScore {
    pub code: i32,
    pub score: f64,
}

/// Shape of the distance decay used by [`ResponseCurve::DistanceDecay`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum DecayKind {
    /// `1 − e^(−d/scale)`, rescaled so the cutoff reaches exactly 1.
    Exponential { scale: f64 },
    /// `d / cutoff`.
    Linear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ResponseCurve {
    /// Linear interpolation between `[x, score]` points sorted by x; flat beyond the ends.
    PiecewiseLinear { points: Vec<[f64; 2]> },
    /// Lookup of an integer class code; unlisted codes get `default`.
    Categorical { classes: Vec<ClassScore>, default: f64 },
    /// Smooth increase around `midpoint`.
    Logistic { midpoint: f64, steepness: f64 },
    /// `below` under `threshold`, `above` at or over it.
    Step { threshold: f64, below: f64, above: f64 },
    /// 1 inside the optimum band, Gaussian decay (σ = `decay`) towards the hard
    /// bounds, 0 outside `[low_bound, high_bound]`.
    Band {
        optimum_low: f64,
        optimum_high: f64,
        low_bound: f64,
        high_bound: f64,
        decay: f64,
    },
    /// 1 up to `threshold`, linear fall to 0 at `zero_at`.
    Taper { threshold: f64, zero_at: f64 },
    /// Rises from 0 at distance 0 to 1 at `cutoff`, and stays at 1 beyond it.
    DistanceDecay { decay: DecayKind, cutoff: f64 },
}

impl ResponseCurve {
    /// Evaluate the curve at `x`. The result is always in [0, 1].
    pub fn evaluate(&self, x: f64) -> f64 {
        let raw = match self {
            ResponseCurve::PiecewiseLinear { points } => piecewise(points, x),
            ResponseCurve::Categorical { classes, default } => {
                let code = x.round() as i32;
                classes.iter().find(|c| c.code == code).map_or(*default, |c| c.score)
            }
            ResponseCurve::Logistic { midpoint, steepness } => {
                1.0 / (1.0 + (-steepness * (x - midpoint)).exp())
            }
            ResponseCurve::Step { threshold, below, above } => {
                if x >= *threshold { *above } else { *below }
            }
            ResponseCurve::Band { optimum_low, optimum_high, low_bound, high_bound, decay } => {
                if x < *low_bound || x > *high_bound {
                    0.0
                } else if x < *optimum_low {
                    gaussian(optimum_low - x, *decay)
                } else if x > *optimum_high {
                    gaussian(x - optimum_high, *decay)
                } else {
                    1.0
                }
            }
            ResponseCurve::Taper { threshold, zero_at } => {
                if x <= *threshold {
                    1.0
                } else if x >= *zero_at {
                    0.0
                } else {
                    1.0 - (x - threshold) / (zero_at - threshold)
                }
            }
            ResponseCurve::DistanceDecay { decay, cutoff } => {
                if x <= 0.0 {
                    0.0
                } else if x >= *cutoff {
                    1.0
                } else {
                    match decay {
                        DecayKind::Exponential { scale } => {
                            (1.0 - (-x / scale).exp()) / (1.0 - (-cutoff / scale).exp())
                        }
                        DecayKind::Linear => x / cutoff,
                    }
                }
            }
        };
        raw.clamp(0.0, 1.0)
    }

    /// True when the curve never decreases as its input grows.
    pub fn is_non_decreasing(&self) -> bool {
        match self {
            ResponseCurve::DistanceDecay { .. } => true,
            ResponseCurve::Logistic { steepness, .. } => *steepness >= 0.0,
            ResponseCurve::Step { below, above, .. } => above >= below,
            ResponseCurve::PiecewiseLinear { points } => points.windows(2).all(|w| w[1][1] >= w[0][1]),
            _ => false,
        }
    }

    /// Short name of the curve type, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ResponseCurve::PiecewiseLinear { .. } => "piecewise_linear",
            ResponseCurve::Categorical { .. } => "categorical",
            ResponseCurve::Logistic { .. } => "logistic",
            ResponseCurve::Step { .. } => "step",
            ResponseCurve::Band { .. } => "band",
            ResponseCurve::Taper { .. } => "taper",
            ResponseCurve::DistanceDecay { .. } => "distance_decay",
        }
    }

    /// Check the parameters; `field` names the config path for error messages.
    pub fn validate(&self, field: &str) -> Result<()> {
        let fail = |reason: String| Err(HabitatError::invalid_config(field, reason));
        match self {
            ResponseCurve::PiecewiseLinear { points } => {
                if points.is_empty() {
                    return fail("piecewise_linear needs at least one point".into());
                }
                if points.iter().flatten().any(|v| !v.is_finite()) {
                    return fail("piecewise_linear points must be finite".into());
                }
                if points.windows(2).any(|w| w[1][0] <= w[0][0]) {
                    return fail("piecewise_linear x values must be strictly increasing".into());
                }
                if let Some(p) = points.iter().find(|p| !(0.0..=1.0).contains(&p[1])) {
                    return fail(format!("score {} at x = {} is outside [0, 1]", p[1], p[0]));
                }
            }
            ResponseCurve::Categorical { classes, default } => {
                if let Some(c) = classes.iter().find(|c| !(0.0..=1.0).contains(&c.score)) {
                    return fail(format!("class {} score {} is outside [0, 1]", c.code, c.score));
                }
                if !(0.0..=1.0).contains(default) {
                    return fail(format!("default score {default} is outside [0, 1]"));
                }
                let mut codes: Vec<i32> = classes.iter().map(|c| c.code).collect();
                codes.sort_unstable();
                if codes.windows(2).any(|w| w[0] == w[1]) {
                    return fail("class codes must be unique".into());
                }
            }
            ResponseCurve::Logistic { midpoint, steepness } => {
                if !midpoint.is_finite() || !steepness.is_finite() || *steepness == 0.0 {
                    return fail("logistic needs a finite midpoint and non-zero steepness".into());
                }
            }
            ResponseCurve::Step { threshold, below, above } => {
                if !threshold.is_finite() {
                    return fail("step threshold must be finite".into());
                }
                if !(0.0..=1.0).contains(below) || !(0.0..=1.0).contains(above) {
                    return fail("step scores must lie in [0, 1]".into());
                }
            }
            ResponseCurve::Band { optimum_low, optimum_high, low_bound, high_bound, decay } => {
                if !(low_bound <= optimum_low && optimum_low <= optimum_high && optimum_high <= high_bound) {
                    return fail(format!(
                        "band requires low_bound ≤ optimum_low ≤ optimum_high ≤ high_bound, got \
                         {low_bound} / {optimum_low} / {optimum_high} / {high_bound}"
                    ));
                }
                if !(decay.is_finite() && *decay > 0.0) {
                    return fail(format!("band decay must be positive, got {decay}"));
                }
            }
            ResponseCurve::Taper { threshold, zero_at } => {
                if !(threshold.is_finite() && zero_at.is_finite() && threshold < zero_at) {
                    return fail(format!("taper requires threshold < zero_at, got {threshold} / {zero_at}"));
                }
            }
            ResponseCurve::DistanceDecay { decay, cutoff } => {
                if !(cutoff.is_finite() && *cutoff > 0.0) {
                    return fail(format!("distance cutoff must be positive, got {cutoff}"));
                }
                if let DecayKind::Exponential { scale } = decay {
                    if !(scale.is_finite() && *scale > 0.0) {
                        return fail(format!("exponential scale must be positive, got {scale}"));
                    }
                }
            }
        }
        Ok(())
    }
}

#[inline]
fn gaussian(d: f64, sigma: f64) -> f64 {
    (-0.5 * (d / sigma).powi(2)).exp()
}

fn piecewise(points: &[[f64; 2]], x: f64) -> f64 {
    let (first, last) = match (points.first(), points.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return 0.0,
    };
    if x <= first[0] {
        return first[1];
    }
    if x >= last[0] {
        return last[1];
    }
    for w in points.windows(2) {
        let ([x0, y0], [x1, y1]) = (w[0], w[1]);
        if x <= x1 {
            let t = (x - x0) / (x1 - x0);
            return y0 + t * (y1 - y0);
        }
    }
    last[1]
}
