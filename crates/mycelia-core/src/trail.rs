use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default ceiling for a trail's strength.
pub const DEFAULT_MAX_STRENGTH: f64 = 10.0;

/// Default per-hour decay multiplier.
pub const DEFAULT_DECAY_RATE: f64 = 0.95;

/// Hours between two instants, never negative.
pub fn hours_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let millis = (later - earlier).num_milliseconds();
    (millis.max(0) as f64) / 3_600_000.0
}

/// Decaying activity counter for one event category (pheromone trail).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trail {
    pub category: String,
    pub strength: f64,
    pub last_update: DateTime<Utc>,
    pub emission_count: u64,
}

impl Trail {
    pub fn new(category: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            category: category.into(),
            strength: 0.0,
            last_update: now,
            emission_count: 0,
        }
    }

    /// Strength at `now` without mutating the trail.
    ///
    /// `strength(t) = strength(t0) * decay_rate ^ hours_elapsed`
    pub fn strength_at(&self, now: DateTime<Utc>, decay_rate: f64) -> f64 {
        let hours = hours_between(self.last_update, now);
        if hours == 0.0 {
            return self.strength.max(0.0);
        }
        (self.strength * decay_rate.powf(hours)).max(0.0)
    }

    /// Fold pending decay into the stored strength.
    pub fn decay_to(&mut self, now: DateTime<Utc>, decay_rate: f64) {
        self.strength = self.strength_at(now, decay_rate);
        if now > self.last_update {
            self.last_update = now;
        }
    }

    /// Decay since the last update, then add `urgency` (bounded by `max_strength`).
    pub fn reinforce(&mut self, urgency: f64, now: DateTime<Utc>, decay_rate: f64, max_strength: f64) {
        self.decay_to(now, decay_rate);
        let urgency = if urgency.is_finite() { urgency.max(0.0) } else { 0.0 };
        self.strength = (self.strength + urgency).clamp(0.0, max_strength);
        self.emission_count += 1;
    }
}

/// Age bracket used by [`TemporalWeighting`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgeBracket {
    /// Upper bound (inclusive) of the bracket, in hours.
    pub max_age_hours: f64,
    pub multiplier: f64,
}

/// Optional pre-scaling of urgency by event age.
///
/// When enabled, `urgency * 0.5^(age / half_life) * bracket_multiplier`.
/// Ages beyond every bracket use a multiplier of 1.0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TemporalWeighting {
    pub enabled: bool,
    pub half_life_hours: f64,
    pub brackets: Vec<AgeBracket>,
}

impl Default for TemporalWeighting {
    fn default() -> Self {
        Self {
            enabled: false,
            half_life_hours: 24.0,
            brackets: vec![
                AgeBracket {
                    max_age_hours: 1.0,
                    multiplier: 1.5,
                },
                AgeBracket {
                    max_age_hours: 24.0,
                    multiplier: 1.0,
                },
                AgeBracket {
                    max_age_hours: 168.0,
                    multiplier: 0.7,
                },
            ],
        }
    }
}

impl TemporalWeighting {
    pub fn bracket_multiplier(&self, age_hours: f64) -> f64 {
        self.brackets
            .iter()
            .find(|b| age_hours <= b.max_age_hours)
            .map(|b| b.multiplier)
            .unwrap_or(1.0)
    }

    pub fn scale(&self, urgency: f64, age_hours: f64) -> f64 {
        if !self.enabled {
            return urgency;
        }
        let age = age_hours.max(0.0);
        let half_life = self.half_life_hours.max(f64::EPSILON);
        urgency * 0.5f64.powf(age / half_life) * self.bracket_multiplier(age)
    }
}
