//! Fixed-weight reward model with a rolling baseline.
//!
//! `quality = mean(correctness, performance, 1 - complexity)`
//! `reward  = 0.40·building_signal + 0.45·quality + 0.15·novelty`, clamped to [0, 1]
//!
//! The weights are fixed so the reward stays auditable: building-heavy work
//! lands roughly 15-25 points above analysis-heavy work, run after run.

use crate::config::RewardConfig;
use crate::error::Result;
use crate::journal::{self, Journal};
use chrono::{DateTime, Utc};
use mycelia_core::InsufficientData;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info, warn};

pub const BUILDING_WEIGHT: f64 = 0.40;
pub const QUALITY_WEIGHT: f64 = 0.45;
pub const NOVELTY_WEIGHT: f64 = 0.15;

fn default_score() -> f64 {
    0.5
}

fn default_building_signal() -> f64 {
    0.75
}

/// Measurement vector for one artifact. Missing fields take neutral
/// defaults instead of failing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RewardMetrics {
    #[serde(default = "default_score")]
    pub correctness: f64,
    #[serde(default = "default_score")]
    pub performance: f64,
    #[serde(default = "default_score")]
    pub complexity: f64,
    #[serde(default = "default_score")]
    pub novelty: f64,
    #[serde(default = "default_building_signal")]
    pub building_signal: f64,
}

impl Default for RewardMetrics {
    fn default() -> Self {
        Self {
            correctness: default_score(),
            performance: default_score(),
            complexity: default_score(),
            novelty: default_score(),
            building_signal: default_building_signal(),
        }
    }
}

fn unit(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

impl RewardMetrics {
    /// Every field in [0, 1]; non-finite values replaced by their defaults.
    pub fn sanitized(&self) -> Self {
        Self {
            correctness: unit(self.correctness, default_score()),
            performance: unit(self.performance, default_score()),
            complexity: unit(self.complexity, default_score()),
            novelty: unit(self.novelty, default_score()),
            building_signal: unit(self.building_signal, default_building_signal()),
        }
    }

    pub fn quality(&self) -> f64 {
        (self.correctness + self.performance + (1.0 - self.complexity)) / 3.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RewardRecord {
    pub reward: f64,
    pub baseline: f64,
    pub advantage: f64,
    pub components: BTreeMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RewardStats {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub building_ratio: f64,
    pub analysis_ratio: f64,
}

#[derive(Debug)]
pub struct RewardModel {
    config: RewardConfig,
    journal: Option<Journal>,
    history: VecDeque<RewardRecord>,
}

impl RewardModel {
    pub fn new(config: RewardConfig) -> Self {
        let journal = config.log_path.as_ref().map(Journal::new);
        Self {
            config,
            journal,
            history: VecDeque::new(),
        }
    }

    /// Model whose ring buffer is refilled from the existing reward log.
    pub fn open(config: RewardConfig) -> Result<Self> {
        let mut model = Self::new(config);
        if let Some(path) = model.config.log_path.clone() {
            let records: Vec<RewardRecord> = journal::read_records(&path)?;
            let n = records.len();
            for record in records {
                model.remember(record);
            }
            info!(path = %path.display(), records = n, "Replayed reward log");
        }
        Ok(model)
    }

    pub fn config(&self) -> &RewardConfig {
        &self.config
    }

    pub fn history(&self) -> impl Iterator<Item = &RewardRecord> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Mean of the last `baseline_window` rewards, or the neutral prior.
    pub fn baseline(&self) -> f64 {
        let window = self.config.baseline_window.min(self.history.len());
        if window == 0 {
            return self.config.neutral_baseline;
        }
        self.history
            .iter()
            .rev()
            .take(window)
            .map(|r| r.reward)
            .sum::<f64>()
            / window as f64
    }

    pub fn compute_reward(&mut self, metrics: &RewardMetrics) -> RewardRecord {
        self.compute_reward_at(metrics, Utc::now())
    }

    pub fn compute_reward_at(&mut self, metrics: &RewardMetrics, now: DateTime<Utc>) -> RewardRecord {
        let m = metrics.sanitized();
        let quality = m.quality();
        let reward = (BUILDING_WEIGHT * m.building_signal
            + QUALITY_WEIGHT * quality
            + NOVELTY_WEIGHT * m.novelty)
            .clamp(0.0, 1.0);
        let baseline = self.baseline();

        let components = BTreeMap::from([
            ("building_signal".to_string(), m.building_signal),
            ("quality".to_string(), quality),
            ("novelty".to_string(), m.novelty),
            ("correctness".to_string(), m.correctness),
            ("performance".to_string(), m.performance),
            ("complexity".to_string(), m.complexity),
        ]);
        let record = RewardRecord {
            reward,
            baseline,
            advantage: reward - baseline,
            components,
            timestamp: now,
        };

        if let Some(journal) = self.journal.as_mut() {
            if let Err(e) = journal.append(&record) {
                warn!(error = %e, "Reward record not persisted");
            }
        }
        debug!(reward, baseline, advantage = record.advantage, "Reward computed");
        self.remember(record.clone());
        record
    }

    fn remember(&mut self, record: RewardRecord) {
        self.history.push_back(record);
        while self.history.len() > self.config.history_capacity {
            self.history.pop_front();
        }
    }

    /// Retry persisting records whose append failed earlier.
    pub fn flush(&mut self) -> bool {
        self.journal.as_mut().map_or(true, Journal::flush)
    }

    /// Summary of the rewards in the ring buffer. Rewards at or above
    /// `building_threshold` count as building-like, the rest as analysis-like.
    pub fn get_statistics(&self) -> std::result::Result<RewardStats, InsufficientData> {
        let count = self.history.len();
        if count == 0 {
            return Err(InsufficientData::new("no rewards recorded", 0));
        }
        let n = count as f64;
        let rewards = self.history.iter().map(|r| r.reward);
        let mean = rewards.clone().sum::<f64>() / n;
        let var = rewards.clone().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
        let building = rewards
            .clone()
            .filter(|r| *r >= self.config.building_threshold)
            .count() as f64;
        Ok(RewardStats {
            count,
            mean,
            std: var.sqrt(),
            min: rewards.clone().fold(f64::INFINITY, f64::min),
            max: rewards.fold(f64::NEG_INFINITY, f64::max),
            building_ratio: building / n,
            analysis_ratio: 1.0 - building / n,
        })
    }
}
