//! Hyphal connection graph between named participants.
//!
//! Each directed edge learns a throughput by reinforcement:
//!
//! - **Thickening**: a successful send multiplies throughput by `success_factor`
//! - **Thinning**: a failed send multiplies it by `failure_factor`
//! - **Health**: running success ratio, decayed while the edge sits idle
//! - **Pruning**: edges whose decayed health falls below `prune_floor` are removed
//!
//! Sends are simulated: latency is `latency_unit / throughput` and the
//! success probability is `0.5 + 0.45 * health`. A failed send is a normal
//! outcome, never an error.

use crate::config::GraphConfig;
use chrono::{DateTime, Utc};
use mycelia_core::hours_between;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub throughput: f64,
    pub health: f64,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl Edge {
    pub fn new(source: String, target: String, throughput: f64, now: DateTime<Utc>) -> Self {
        Self {
            source,
            target,
            throughput,
            health: 1.0,
            attempts: 0,
            successes: 0,
            failures: 0,
            created_at: now,
            last_used: now,
        }
    }

    /// Probability that the next simulated send succeeds.
    pub fn success_probability(&self) -> f64 {
        (0.5 + 0.45 * self.health).clamp(0.0, 1.0)
    }

    /// Simulated transmission time at the current throughput.
    pub fn latency(&self, unit: Duration) -> Duration {
        unit.div_f64(self.throughput.max(f64::MIN_POSITIVE))
    }

    pub fn record_attempt(&mut self, success: bool, now: DateTime<Utc>) {
        self.attempts += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        if now > self.last_used {
            self.last_used = now;
        }
    }

    /// Adjust throughput for the latest outcome and recompute health.
    pub fn reinforce(&mut self, success: bool, config: &GraphConfig) {
        let factor = if success {
            config.success_factor
        } else {
            config.failure_factor
        };
        self.throughput =
            (self.throughput * factor).clamp(config.min_throughput, config.max_throughput);
        self.health = if self.attempts == 0 {
            1.0
        } else {
            self.successes as f64 / self.attempts as f64
        };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphStats {
    pub count: usize,
    pub highway_count: usize,
    pub avg_throughput: f64,
    pub avg_health: f64,
    pub success_rate: f64,
}

#[derive(Debug)]
pub struct ConnectionGraph {
    pub config: GraphConfig,
    edges: HashMap<(String, String), Edge>,
    rng: StdRng,
    last_prune: Option<DateTime<Utc>>,
}

impl ConnectionGraph {
    pub fn new(config: GraphConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            config,
            edges: HashMap::new(),
            rng,
            last_prune: None,
        }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn edge(&self, source: &str, target: &str) -> Option<&Edge> {
        self.edges.get(&(source.to_string(), target.to_string()))
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn get_or_create_edge(&mut self, source: &str, target: &str) -> &mut Edge {
        self.get_or_create_edge_at(source, target, Utc::now())
    }

    /// Idempotent: the second call for the same pair returns the same edge.
    pub fn get_or_create_edge_at(
        &mut self,
        source: &str,
        target: &str,
        now: DateTime<Utc>,
    ) -> &mut Edge {
        let initial = self.config.initial_throughput;
        self.edges
            .entry((source.to_string(), target.to_string()))
            .or_insert_with(|| {
                debug!(source, target, "Edge created");
                Edge::new(source.to_string(), target.to_string(), initial, now)
            })
    }

    /// Simulate a transmission. Waits for the edge's latency, draws the
    /// outcome from its health, then records and reinforces.
    pub async fn send(&mut self, source: &str, target: &str, payload: &Value) -> bool {
        let unit = Duration::from_millis(self.config.latency_unit_ms);
        let (latency, p) = {
            let edge = self.get_or_create_edge(source, target);
            (edge.latency(unit), edge.success_probability())
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let success = self.rng.random_bool(p);
        debug!(
            source,
            target,
            success,
            bytes = payload.to_string().len(),
            latency_ms = latency.as_millis() as u64,
            "Simulated send"
        );
        self.record_outcome(source, target, success);
        success
    }

    /// Record an observed outcome on `source -> target`.
    pub fn record_outcome(&mut self, source: &str, target: &str, success: bool) -> &Edge {
        self.record_outcome_at(source, target, success, Utc::now())
    }

    pub fn record_outcome_at(
        &mut self,
        source: &str,
        target: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> &Edge {
        let config = self.config.clone();
        let edge = self.get_or_create_edge_at(source, target, now);
        edge.record_attempt(success, now);
        edge.reinforce(success, &config);
        edge
    }

    pub fn prune(&mut self) -> Vec<(String, String)> {
        self.prune_at(Utc::now())
    }

    /// Decay health by idle time, then drop edges below `prune_floor`.
    /// Idle time is counted from the later of last use and the previous
    /// prune, so repeated prunes do not compound the same interval.
    /// Returns the removed `(source, target)` pairs.
    pub fn prune_at(&mut self, now: DateTime<Utc>) -> Vec<(String, String)> {
        let decay = self.config.health_decay;
        let floor = self.config.prune_floor;
        let last_prune = self.last_prune;
        for edge in self.edges.values_mut() {
            let since = match last_prune {
                Some(p) if p > edge.last_used => p,
                _ => edge.last_used,
            };
            let idle = hours_between(since, now);
            edge.health = (edge.health * decay.powf(idle)).clamp(0.0, 1.0);
        }
        let dead: Vec<(String, String)> = self
            .edges
            .iter()
            .filter(|(_, e)| e.health < floor)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &dead {
            self.edges.remove(key);
        }
        if last_prune.is_none_or(|p| now > p) {
            self.last_prune = Some(now);
        }
        if !dead.is_empty() {
            info!(pruned = dead.len(), remaining = self.edges.len(), "Pruned weak edges");
        }
        dead
    }

    /// Drop every edge touching `name`. Returns how many were removed.
    pub fn remove_participant(&mut self, name: &str) -> usize {
        let before = self.edges.len();
        self.edges.retain(|(s, t), _| s != name && t != name);
        before - self.edges.len()
    }

    /// Edges with throughput at or above `min_throughput`, widest first.
    pub fn get_highways(&self, min_throughput: f64) -> Vec<&Edge> {
        let mut highways: Vec<&Edge> = self
            .edges
            .values()
            .filter(|e| e.throughput >= min_throughput)
            .collect();
        highways.sort_by(|a, b| {
            b.throughput
                .total_cmp(&a.throughput)
                .then_with(|| (&a.source, &a.target).cmp(&(&b.source, &b.target)))
        });
        highways
    }

    pub fn get_statistics(&self) -> GraphStats {
        let count = self.edges.len();
        if count == 0 {
            return GraphStats {
                count: 0,
                highway_count: 0,
                avg_throughput: 0.0,
                avg_health: 0.0,
                success_rate: 0.0,
            };
        }
        let n = count as f64;
        let (attempts, successes) = self
            .edges
            .values()
            .fold((0u64, 0u64), |(a, s), e| (a + e.attempts, s + e.successes));
        GraphStats {
            count,
            highway_count: self
                .edges
                .values()
                .filter(|e| e.throughput >= self.config.highway_threshold)
                .count(),
            avg_throughput: self.edges.values().map(|e| e.throughput).sum::<f64>() / n,
            avg_health: self.edges.values().map(|e| e.health).sum::<f64>() / n,
            success_rate: if attempts == 0 {
                0.0
            } else {
                successes as f64 / attempts as f64
            },
        }
    }
}
