//! Homeostatic regulation: observed system metrics -> one of five operating modes.
//!
//! The regulator is stateless. Each call re-evaluates the current metrics
//! against fixed thresholds, in priority order:
//!
//! 1. **Throttle**: artifact rate or cascade probability above max (safety)
//! 2. **Recover**: continuity ratio below min (integrity)
//! 3. **Explore**: artifact rate and cascade probability both below min
//! 4. **Exploit**: building ratio and cascade probability at or above healthy
//! 5. **Synthesize**: everything else

use crate::diagnostics::InsufficientData;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Explore,
    #[default]
    Synthesize,
    Exploit,
    Throttle,
    Recover,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Explore => "EXPLORE",
            Mode::Synthesize => "SYNTHESIZE",
            Mode::Exploit => "EXPLOIT",
            Mode::Throttle => "THROTTLE",
            Mode::Recover => "RECOVER",
        };
        f.write_str(s)
    }
}

/// Bounds for one observed metric.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MetricBand {
    pub min: f64,
    pub healthy: f64,
    pub max: f64,
}

impl MetricBand {
    pub const fn new(min: f64, healthy: f64, max: f64) -> Self {
        Self { min, healthy, max }
    }

    /// 1 - normalized distance from the healthy value, floored at 0.
    pub fn proximity(&self, value: f64) -> f64 {
        let span = (self.max - self.min).abs();
        if span <= f64::EPSILON || !value.is_finite() {
            return if value == self.healthy { 1.0 } else { 0.0 };
        }
        (1.0 - (value - self.healthy).abs() / span).clamp(0.0, 1.0)
    }
}

/// Immutable threshold record consumed by [`regulate`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegulatorThresholds {
    /// Artifacts produced per hour.
    pub artifact_rate: MetricBand,
    /// Expected follow-on artifacts per artifact.
    pub cascade_probability: MetricBand,
    /// Fraction of sessions that resumed from a valid checkpoint.
    pub continuity_ratio: MetricBand,
    /// Fraction of recent artifacts classified as building work.
    pub building_ratio: MetricBand,
}

impl Default for RegulatorThresholds {
    fn default() -> Self {
        Self {
            artifact_rate: MetricBand::new(3.0, 6.0, 12.0),
            cascade_probability: MetricBand::new(1.5, 2.5, 4.0),
            continuity_ratio: MetricBand::new(0.7, 0.9, 1.0),
            building_ratio: MetricBand::new(0.3, 0.6, 0.9),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub artifact_rate: f64,
    pub cascade_probability: f64,
    pub continuity_ratio: f64,
    pub building_ratio: f64,
}

impl SystemMetrics {
    pub const FIELDS: [&'static str; 4] = [
        "artifact_rate",
        "cascade_probability",
        "continuity_ratio",
        "building_ratio",
    ];

    /// Build from loosely keyed observations. Every field is required.
    pub fn from_observations(obs: &HashMap<String, f64>) -> Result<Self, InsufficientData> {
        let missing: Vec<&str> = Self::FIELDS
            .iter()
            .copied()
            .filter(|k| !obs.get(*k).is_some_and(|v| v.is_finite()))
            .collect();
        if !missing.is_empty() {
            return Err(InsufficientData::new(
                format!("missing regulator metrics: {}", missing.join(", ")),
                Self::FIELDS.len() - missing.len(),
            ));
        }
        Ok(Self {
            artifact_rate: obs["artifact_rate"],
            cascade_probability: obs["cascade_probability"],
            continuity_ratio: obs["continuity_ratio"],
            building_ratio: obs["building_ratio"],
        })
    }
}

/// Per-mode policy parameter overrides.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PolicyOverrides {
    /// Minimum novelty an artifact needs to be accepted.
    pub novelty_floor: f64,
    /// Maximum iterations per work cycle.
    pub max_iterations: u32,
    /// Pause between cycles.
    pub cooldown_seconds: u64,
    /// Share of effort given to unexplored categories.
    pub exploration_weight: f64,
}

pub fn regulate(metrics: &SystemMetrics, t: &RegulatorThresholds) -> Mode {
    if metrics.artifact_rate > t.artifact_rate.max
        || metrics.cascade_probability > t.cascade_probability.max
    {
        return Mode::Throttle;
    }
    if metrics.continuity_ratio < t.continuity_ratio.min {
        return Mode::Recover;
    }
    if metrics.artifact_rate < t.artifact_rate.min
        && metrics.cascade_probability < t.cascade_probability.min
    {
        return Mode::Explore;
    }
    if metrics.building_ratio >= t.building_ratio.healthy
        && metrics.cascade_probability >= t.cascade_probability.healthy
    {
        return Mode::Exploit;
    }
    Mode::Synthesize
}

/// Static override table.
pub fn apply_mode(mode: Mode) -> PolicyOverrides {
    match mode {
        Mode::Explore => PolicyOverrides {
            novelty_floor: 0.3,
            max_iterations: 12,
            cooldown_seconds: 30,
            exploration_weight: 0.6,
        },
        Mode::Synthesize => PolicyOverrides {
            novelty_floor: 0.5,
            max_iterations: 8,
            cooldown_seconds: 60,
            exploration_weight: 0.3,
        },
        Mode::Exploit => PolicyOverrides {
            novelty_floor: 0.6,
            max_iterations: 10,
            cooldown_seconds: 45,
            exploration_weight: 0.1,
        },
        Mode::Throttle => PolicyOverrides {
            novelty_floor: 0.8,
            max_iterations: 3,
            cooldown_seconds: 300,
            exploration_weight: 0.05,
        },
        Mode::Recover => PolicyOverrides {
            novelty_floor: 0.7,
            max_iterations: 4,
            cooldown_seconds: 180,
            exploration_weight: 0.0,
        },
    }
}

/// Mean proximity-to-healthy across the four metrics, in [0, 1].
pub fn health_score(metrics: &SystemMetrics, t: &RegulatorThresholds) -> f64 {
    let scores = [
        t.artifact_rate.proximity(metrics.artifact_rate),
        t.cascade_probability.proximity(metrics.cascade_probability),
        t.continuity_ratio.proximity(metrics.continuity_ratio),
        t.building_ratio.proximity(metrics.building_ratio),
    ];
    (scores.iter().sum::<f64>() / scores.len() as f64).clamp(0.0, 1.0)
}
