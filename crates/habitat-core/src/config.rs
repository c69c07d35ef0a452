//! Engine configuration.
//!
//! Every recognised option is enumerated here; unknown keys are rejected and
//! every range is checked when the file is loaded, so a typo fails the run
//! instead of silently falling back to a default.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::curves::{ClassScore, DecayKind, ResponseCurve};
use crate::error::{HabitatError, Result};
use crate::normalize::{Criterion, LandcoverClass};
use crate::overlay::HexColor;

/// Weight and response curve of a single criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CriterionConfig {
    /// Relative weight; positive, need not sum to 1 across criteria.
    pub weight: f64,
    pub curve: ResponseCurve,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CriteriaConfig {
    pub landcover: CriterionConfig,
    pub prey: CriterionConfig,
    pub elevation: CriterionConfig,
    pub slope: CriterionConfig,
    pub settlement_distance: CriterionConfig,
    pub road_distance: CriterionConfig,
}

impl CriteriaConfig {
    pub fn get(&self, criterion: Criterion) -> &CriterionConfig {
        match criterion {
            Criterion::Landcover => &self.landcover,
            Criterion::Prey => &self.prey,
            Criterion::Elevation => &self.elevation,
            Criterion::Slope => &self.slope,
            Criterion::SettlementDistance => &self.settlement_distance,
            Criterion::RoadDistance => &self.road_distance,
        }
    }
}

impl Default for CriteriaConfig {
    fn default() -> Self {
        Self {
            landcover: CriterionConfig {
                weight: 0.30,
                curve: ResponseCurve::Categorical {
                    classes: LandcoverClass::ALL
                        .iter()
                        .map(|c| ClassScore { code: c.code(), score: c.default_preference() })
                        .collect(),
                    default: 0.0,
                },
            },
            prey: CriterionConfig {
                weight: 0.15,
                // Pasture fraction of the cell, 0–1.
                curve: ResponseCurve::Logistic { midpoint: 0.2, steepness: 20.0 },
            },
            elevation: CriterionConfig {
                weight: 0.15,
                curve: ResponseCurve::Band {
                    optimum_low: 900.0,
                    optimum_high: 2200.0,
                    low_bound: 400.0,
                    high_bound: 2900.0,
                    decay: 300.0,
                },
            },
            slope: CriterionConfig {
                weight: 0.10,
                curve: ResponseCurve::Taper { threshold: 30.0, zero_at: 60.0 },
            },
            settlement_distance: CriterionConfig {
                weight: 0.20,
                curve: ResponseCurve::DistanceDecay {
                    decay: DecayKind::Exponential { scale: 500.0 },
                    cutoff: 2000.0,
                },
            },
            road_distance: CriterionConfig {
                weight: 0.10,
                curve: ResponseCurve::DistanceDecay {
                    decay: DecayKind::Exponential { scale: 250.0 },
                    cutoff: 1000.0,
                },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Potential core habitat: score strictly above this value.
    pub core_threshold: f64,
    /// Extra settlement buffer for the conflict-minimized scenario; off when `None`.
    pub min_settlement_distance_m: Option<f64>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self { core_threshold: 0.6, min_settlement_distance_m: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConflictConfig {
    /// Suitability a pasture cell must exceed to count as a conflict.
    pub suitability_threshold: f64,
    /// Indicator values strictly above this mark a pasture / alpage as present.
    pub presence_threshold: f64,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self { suitability_threshold: 0.5, presence_threshold: 0.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverlayConfig {
    /// Equally spaced colour stops from lowest to highest suitability.
    pub suitability_colors: Vec<HexColor>,
    /// Score range stretched over the colour ramp; values outside are clamped.
    pub clamp: [f64; 2],
    pub core_color: HexColor,
    pub conflict_minimized_color: HexColor,
    pub medium_risk_color: HexColor,
    pub high_risk_color: HexColor,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            // Red → yellow → blue.
            suitability_colors: vec![
                HexColor::rgb(0xd7, 0x30, 0x27),
                HexColor::rgb(0xff, 0xff, 0xbf),
                HexColor::rgb(0x45, 0x75, 0xb4),
            ],
            clamp: [0.15, 0.85],
            core_color: HexColor::rgb(0x1a, 0x98, 0x50),
            conflict_minimized_color: HexColor::rgb(0x2c, 0x7b, 0xb6),
            medium_risk_color: HexColor::rgb(0xfd, 0xae, 0x61),
            high_risk_color: HexColor::rgb(0xd7, 0x19, 0x1c),
        }
    }
}

/// Complete configuration of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HabitatConfig {
    pub criteria: CriteriaConfig,
    pub scenario: ScenarioConfig,
    pub conflict: ConflictConfig,
    pub overlay: OverlayConfig,
    /// Process the grid in horizontal bands of this many rows; whole grid when `None`.
    pub tile_rows: Option<usize>,
}

impl HabitatConfig {
    /// Load a JSON configuration file and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    /// Parse JSON and validate it.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every range; the first violation is returned.
    pub fn validate(&self) -> Result<()> {
        for criterion in Criterion::ALL {
            let cc = self.criteria.get(criterion);
            let name = criterion.name();
            if !cc.weight.is_finite() || cc.weight <= 0.0 {
                return Err(HabitatError::invalid_weight(
                    name,
                    format!("weight must be positive and finite, got {}", cc.weight),
                ));
            }
            let field = format!("criteria.{name}.curve");
            cc.curve.validate(&field)?;
            if !criterion.accepts(&cc.curve) {
                return Err(HabitatError::invalid_config(
                    field,
                    format!("curve type '{}' is not valid for {name}", cc.curve.kind()),
                ));
            }
        }

        unit_interval("scenario.core_threshold", self.scenario.core_threshold)?;
        if let Some(d) = self.scenario.min_settlement_distance_m {
            if !d.is_finite() || d < 0.0 {
                return Err(HabitatError::invalid_config(
                    "scenario.min_settlement_distance_m",
                    format!("must be a non-negative distance, got {d}"),
                ));
            }
        }

        unit_interval("conflict.suitability_threshold", self.conflict.suitability_threshold)?;
        if !self.conflict.presence_threshold.is_finite() {
            return Err(HabitatError::invalid_config(
                "conflict.presence_threshold",
                "must be finite",
            ));
        }

        let [lo, hi] = self.overlay.clamp;
        if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo >= hi {
            return Err(HabitatError::invalid_config(
                "overlay.clamp",
                format!("need 0 ≤ low < high ≤ 1, got [{lo}, {hi}]"),
            ));
        }
        if self.overlay.suitability_colors.len() < 2 {
            return Err(HabitatError::invalid_config(
                "overlay.suitability_colors",
                "at least two colour stops are required",
            ));
        }

        if self.tile_rows == Some(0) {
            return Err(HabitatError::invalid_config("tile_rows", "must be at least 1"));
        }
        Ok(())
    }
}

fn unit_interval(field: &str, v: f64) -> Result<()> {
    if (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(HabitatError::invalid_config(field, format!("must lie in [0, 1], got {v}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        HabitatConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = HabitatConfig::from_json(r#"{"scenario": {"core_threshold": 0.7}}"#).unwrap();
        assert_eq!(cfg.scenario.core_threshold, 0.7);
        assert_eq!(cfg.criteria, CriteriaConfig::default());
        assert_eq!(cfg.overlay.clamp, [0.15, 0.85]);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = HabitatConfig::from_json(r#"{"scenario": {"core_treshold": 0.7}}"#).unwrap_err();
        assert!(matches!(err, HabitatError::Json(_)), "got {err:?}");
    }

    #[test]
    fn non_positive_weight_is_invalid_weight() {
        let mut cfg = HabitatConfig::default();
        cfg.criteria.slope.weight = 0.0;
        assert!(matches!(cfg.validate(), Err(HabitatError::InvalidWeight { .. })));
        cfg.criteria.slope.weight = f64::NAN;
        assert!(matches!(cfg.validate(), Err(HabitatError::InvalidWeight { .. })));
    }

    #[test]
    fn out_of_range_thresholds_fail_fast() {
        let mut cfg = HabitatConfig::default();
        cfg.scenario.core_threshold = 1.2;
        assert!(matches!(cfg.validate(), Err(HabitatError::InvalidConfig { .. })));

        let mut cfg = HabitatConfig::default();
        cfg.overlay.clamp = [0.85, 0.15];
        assert!(cfg.validate().is_err());

        let mut cfg = HabitatConfig::default();
        cfg.tile_rows = Some(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn wrong_curve_type_for_criterion_is_rejected() {
        let mut cfg = HabitatConfig::default();
        // A falling curve would make suitability drop with distance from settlements.
        cfg.criteria.settlement_distance.curve = ResponseCurve::Taper { threshold: 10.0, zero_at: 100.0 };
        match cfg.validate() {
            Err(HabitatError::InvalidConfig { field, .. }) => {
                assert_eq!(field, "criteria.settlement_distance.curve")
            }
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = HabitatConfig::default();
        let text = serde_json::to_string_pretty(&cfg).unwrap();
        assert_eq!(HabitatConfig::from_json(&text).unwrap(), cfg);
    }
}
