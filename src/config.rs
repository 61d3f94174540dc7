//! Policy file: regulator thresholds, decay rates and temporal-weighting toggles.
//!
//! Every field has a default, so a missing file (or a partial one) still
//! yields a runnable configuration.

use crate::error::{MyceliaError, Result};
use mycelia_core::trail::{DEFAULT_DECAY_RATE, DEFAULT_MAX_STRENGTH};
use mycelia_core::{RegulatorThresholds, TemporalWeighting};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Environment variable naming the policy file used by the binaries.
pub const CONFIG_ENV: &str = "MYCELIA_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    pub bus: BusConfig,
    pub graph: GraphConfig,
    pub regulator: RegulatorThresholds,
    pub ledger: LedgerConfig,
    pub reward: RewardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BusConfig {
    /// Per-hour multiplier applied to trail strength.
    pub decay_rate: f64,
    pub max_strength: f64,
    /// Where trail snapshots are written. `None` keeps trails in memory only.
    pub snapshot_path: Option<PathBuf>,
    /// Write a snapshot every N emissions (0 disables periodic snapshots).
    pub snapshot_every: u64,
    /// How long the dispatch loop waits on an empty queue before re-checking `stop`.
    pub poll_interval_ms: u64,
    pub temporal: TemporalWeighting,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            decay_rate: DEFAULT_DECAY_RATE,
            max_strength: DEFAULT_MAX_STRENGTH,
            snapshot_path: None,
            snapshot_every: 50,
            poll_interval_ms: 1000,
            temporal: TemporalWeighting::default(),
        }
    }
}

impl BusConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphConfig {
    pub initial_throughput: f64,
    pub min_throughput: f64,
    pub max_throughput: f64,
    /// Multiplier applied to throughput after a successful send.
    pub success_factor: f64,
    /// Multiplier applied to throughput after a failed send.
    pub failure_factor: f64,
    /// Edges whose health decays below this are pruned.
    pub prune_floor: f64,
    /// Per-hour multiplier applied to health of idle edges during `prune`.
    pub health_decay: f64,
    /// Throughput at which an edge counts as a highway in statistics.
    pub highway_threshold: f64,
    /// Simulated latency of a send at throughput 1.0.
    pub latency_unit_ms: u64,
    /// Seed for the outcome RNG. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            initial_throughput: 1.0,
            min_throughput: 0.1,
            max_throughput: 20.0,
            success_factor: 1.1,
            failure_factor: 0.9,
            prune_floor: 0.2,
            health_decay: 0.99,
            highway_threshold: 5.0,
            latency_unit_ms: 10,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LedgerConfig {
    /// Append-only decision log. `None` keeps the ledger in memory only.
    pub log_path: Option<PathBuf>,
    /// Size of the in-memory recent-decisions cache.
    pub recent_capacity: usize,
    /// Fewest (age, weight) pairs accepted by the decay fit.
    pub min_fit_samples: usize,
    /// Look-back window for the decay fit, in days.
    pub window_days: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            recent_capacity: 1000,
            min_fit_samples: 10,
            window_days: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RewardConfig {
    /// Permanent reward log. `None` keeps rewards in memory only.
    pub log_path: Option<PathBuf>,
    /// Number of recent rewards averaged into the baseline.
    pub baseline_window: usize,
    /// Baseline used before any reward has been recorded.
    pub neutral_baseline: f64,
    /// Ring buffer size.
    pub history_capacity: usize,
    /// Rewards at or above this count as building-like.
    pub building_threshold: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            baseline_window: 20,
            neutral_baseline: 0.70,
            history_capacity: 1000,
            building_threshold: 0.82,
        }
    }
}

impl PolicyConfig {
    /// Parse and validate a policy file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| MyceliaError::io(path, e))?;
        let config: PolicyConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given and present; otherwise fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => {
                let config = Self::from_file(p)?;
                info!(path = %p.display(), "Loaded policy file");
                Ok(config)
            }
            Some(p) => {
                info!(path = %p.display(), "Policy file not found, using defaults");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Load from the path named by [`CONFIG_ENV`], if any.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        Self::load(path.as_deref())
    }

    /// Reject configurations that would violate component invariants.
    pub fn validate(&self) -> Result<()> {
        let bus = &self.bus;
        if !(bus.decay_rate > 0.0 && bus.decay_rate <= 1.0) {
            return Err(invalid(format!(
                "bus.decay_rate must be in (0, 1], got {}",
                bus.decay_rate
            )));
        }
        if !(bus.max_strength > 0.0) {
            return Err(invalid("bus.max_strength must be positive"));
        }

        let g = &self.graph;
        if !(g.min_throughput > 0.0) {
            return Err(invalid("graph.min_throughput must be positive"));
        }
        if g.min_throughput > g.max_throughput {
            return Err(invalid(format!(
                "graph.min_throughput ({}) exceeds graph.max_throughput ({})",
                g.min_throughput, g.max_throughput
            )));
        }
        if !(g.min_throughput..=g.max_throughput).contains(&g.initial_throughput) {
            return Err(invalid("graph.initial_throughput outside [min, max]"));
        }
        if !(g.success_factor >= 1.0) || !(g.failure_factor > 0.0 && g.failure_factor <= 1.0) {
            return Err(invalid(
                "graph.success_factor must be >= 1 and graph.failure_factor in (0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&g.prune_floor) || !(g.health_decay > 0.0 && g.health_decay <= 1.0)
        {
            return Err(invalid(
                "graph.prune_floor must be in [0, 1] and graph.health_decay in (0, 1]",
            ));
        }

        if self.ledger.recent_capacity == 0 {
            return Err(invalid("ledger.recent_capacity must be at least 1"));
        }

        let r = &self.reward;
        if r.baseline_window == 0 || r.history_capacity == 0 {
            return Err(invalid(
                "reward.baseline_window and reward.history_capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> MyceliaError {
    MyceliaError::InvalidConfig(msg.into())
}
