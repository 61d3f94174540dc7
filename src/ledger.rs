//! Causal ledger: append-only log of weighted-attribution decisions.
//!
//! Every decision records which sources influenced it and by how much. Raw
//! weights are kept next to the normalized ones because the decay fit needs
//! the unnormalized values; normalizing would bias the estimated rate.
//!
//! In memory the ledger keeps:
//!
//! - a bounded cache of recent decisions (oldest evicted first),
//! - an influence index `source_id -> [(decision, weights, timestamp)]`,
//! - a lineage index `output -> [(source_id, normalized weight)]` used for
//!   ancestry queries.
//!
//! The on-disk log is never trimmed.

use crate::config::LedgerConfig;
use crate::error::Result;
use crate::journal::{self, Journal};
use chrono::{DateTime, Utc};
use mycelia_core::InsufficientData;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};
use uuid::Uuid;

const NORMALIZATION_TOLERANCE: f64 = 1e-6;

/// One attribution offered to [`CausalLedger::log_decision`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InfluenceInput {
    pub source_id: String,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl InfluenceInput {
    pub fn new(source_id: impl Into<String>, weight: f64) -> Self {
        Self {
            source_id: source_id.into(),
            weight,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightedInput {
    pub source_id: String,
    pub raw_weight: f64,
    pub normalized_weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub decision_type: String,
    pub inputs: Vec<WeightedInput>,
    pub output: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Decision {
    pub fn normalized_sum(&self) -> f64 {
        self.inputs.iter().map(|i| i.normalized_weight).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InfluenceEntry {
    pub decision_id: Uuid,
    pub decision_type: String,
    pub normalized_weight: f64,
    pub raw_weight: f64,
    pub timestamp: DateTime<Utc>,
}

/// Result of fitting `weight ≈ A·exp(-rate·age_days)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecayFit {
    pub rate: f64,
    pub r_squared: f64,
    pub n: usize,
    /// `ln A` of the fit.
    pub intercept: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ancestor {
    pub source_id: String,
    /// Product of normalized weights along the strongest path found.
    pub weight: f64,
    pub depth: usize,
}

#[derive(Debug)]
pub struct CausalLedger {
    config: LedgerConfig,
    journal: Option<Journal>,
    recent: VecDeque<Decision>,
    influence: HashMap<String, Vec<InfluenceEntry>>,
    lineage: HashMap<String, Vec<(String, f64)>>,
    total: u64,
}

/// Raw weights as stored: non-finite values become 0.
fn sanitize(weight: f64) -> f64 {
    if weight.is_finite() {
        weight
    } else {
        0.0
    }
}

/// Normalize to sum 1, falling back to uniform when nothing is positive.
/// Weights are first scaled by the largest one so huge values cannot
/// overflow the total.
fn normalize(raw: &[f64]) -> Vec<f64> {
    let peak = raw.iter().fold(0.0f64, |m, w| m.max(*w));
    if peak <= 0.0 {
        return vec![1.0 / raw.len() as f64; raw.len()];
    }
    let scaled: Vec<f64> = raw.iter().map(|w| w.max(0.0) / peak).collect();
    let total: f64 = scaled.iter().sum();
    scaled.into_iter().map(|w| w / total).collect()
}

impl CausalLedger {
    /// In-memory ledger; the log path in `config` is used for appends only.
    pub fn new(config: LedgerConfig) -> Self {
        let journal = config.log_path.as_ref().map(Journal::new);
        Self {
            config,
            journal,
            recent: VecDeque::new(),
            influence: HashMap::new(),
            lineage: HashMap::new(),
            total: 0,
        }
    }

    /// Ledger whose indexes are rebuilt from the existing log, if any.
    pub fn open(config: LedgerConfig) -> Result<Self> {
        let mut ledger = Self::new(config);
        if let Some(path) = ledger.config.log_path.clone() {
            let decisions: Vec<Decision> = journal::read_records(&path)?;
            let n = decisions.len();
            for decision in decisions {
                ledger.index(decision);
            }
            info!(path = %path.display(), decisions = n, "Replayed decision log");
        }
        Ok(ledger)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Decisions logged or replayed over the ledger's lifetime.
    pub fn total_logged(&self) -> u64 {
        self.total
    }

    pub fn recent(&self) -> impl Iterator<Item = &Decision> {
        self.recent.iter()
    }

    pub fn influence_entries(&self, source_id: &str) -> &[InfluenceEntry] {
        self.influence
            .get(source_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Lines not yet persisted because of earlier write failures.
    pub fn pending_writes(&self) -> usize {
        self.journal.as_ref().map_or(0, Journal::pending)
    }

    /// Retry pending writes. True when the log is fully caught up.
    pub fn flush(&mut self) -> bool {
        self.journal.as_mut().map_or(true, Journal::flush)
    }

    /// Normalize, persist and index one decision.
    ///
    /// A decision without inputs cannot carry weights summing to 1 and is
    /// dropped with an [`InsufficientData`] result.
    pub fn log_decision(
        &mut self,
        decision_type: &str,
        inputs: Vec<InfluenceInput>,
        output: impl Into<String>,
        metadata: Map<String, Value>,
        timestamp: Option<DateTime<Utc>>,
    ) -> std::result::Result<Uuid, InsufficientData> {
        if inputs.is_empty() {
            warn!(decision_type, "Dropping decision without inputs");
            return Err(InsufficientData::new("decision has no inputs", 0));
        }

        let raw: Vec<f64> = inputs.iter().map(|i| sanitize(i.weight)).collect();
        let normalized = normalize(&raw);
        let decision = Decision {
            id: Uuid::new_v4(),
            timestamp: timestamp.unwrap_or_else(Utc::now),
            decision_type: decision_type.to_string(),
            inputs: inputs
                .into_iter()
                .zip(raw.iter().zip(normalized.iter()))
                .map(|(input, (&raw_weight, &normalized_weight))| WeightedInput {
                    source_id: input.source_id,
                    raw_weight,
                    normalized_weight,
                    reason: input.reason,
                })
                .collect(),
            output: output.into(),
            metadata,
        };

        let sum = decision.normalized_sum();
        if (sum - 1.0).abs() > NORMALIZATION_TOLERANCE {
            warn!(decision_type, sum, "Dropping decision with unnormalizable weights");
            return Err(InsufficientData::new(
                "normalized weights do not sum to 1",
                decision.inputs.len(),
            ));
        }

        if let Some(journal) = self.journal.as_mut() {
            if let Err(e) = journal.append(&decision) {
                warn!(decision_id = %decision.id, error = %e, "Decision not persisted");
            }
        }

        let id = decision.id;
        debug!(decision_id = %id, decision_type, inputs = decision.inputs.len(), "Decision logged");
        self.index(decision);
        Ok(id)
    }

    fn index(&mut self, decision: Decision) {
        for input in &decision.inputs {
            self.influence
                .entry(input.source_id.clone())
                .or_default()
                .push(InfluenceEntry {
                    decision_id: decision.id,
                    decision_type: decision.decision_type.clone(),
                    normalized_weight: input.normalized_weight,
                    raw_weight: input.raw_weight,
                    timestamp: decision.timestamp,
                });
        }
        if !decision.output.is_empty() {
            let parents = self.lineage.entry(decision.output.clone()).or_default();
            parents.extend(
                decision
                    .inputs
                    .iter()
                    .map(|i| (i.source_id.clone(), i.normalized_weight)),
            );
        }
        self.total += 1;
        self.recent.push_back(decision);
        while self.recent.len() > self.config.recent_capacity {
            self.recent.pop_front();
        }
    }

    /// Sum of normalized weight a source has contributed across decisions.
    pub fn influence_of(&self, source_id: &str) -> f64 {
        self.influence_entries(source_id)
            .iter()
            .map(|e| e.normalized_weight)
            .sum()
    }

    /// The `k` most influential sources, strongest first.
    pub fn top_influencers(&self, k: usize) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .influence
            .iter()
            .map(|(id, entries)| (id.clone(), entries.iter().map(|e| e.normalized_weight).sum()))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
    }

    pub fn compute_decay_rate(
        &self,
        decision_type: Option<&str>,
        window_days: f64,
        use_raw_weights: bool,
    ) -> std::result::Result<DecayFit, InsufficientData> {
        self.compute_decay_rate_at(decision_type, window_days, use_raw_weights, Utc::now())
    }

    /// Fit `ln(weight) = intercept - rate·age_days` by least squares over
    /// every indexed (age, weight) pair inside the window.
    pub fn compute_decay_rate_at(
        &self,
        decision_type: Option<&str>,
        window_days: f64,
        use_raw_weights: bool,
        now: DateTime<Utc>,
    ) -> std::result::Result<DecayFit, InsufficientData> {
        let points: Vec<(f64, f64)> = self
            .influence
            .values()
            .flatten()
            .filter(|e| decision_type.is_none_or(|t| e.decision_type == t))
            .filter_map(|e| {
                let age = ((now - e.timestamp).num_milliseconds().max(0) as f64) / 86_400_000.0;
                let weight = if use_raw_weights {
                    e.raw_weight
                } else {
                    e.normalized_weight
                };
                (age <= window_days && weight > 0.0 && weight.is_finite())
                    .then(|| (age, weight.ln()))
            })
            .collect();

        let n = points.len();
        if n < self.config.min_fit_samples.max(2) {
            return Err(InsufficientData::new("insufficient data", n));
        }

        let nf = n as f64;
        let mean_x = points.iter().map(|p| p.0).sum::<f64>() / nf;
        let mean_y = points.iter().map(|p| p.1).sum::<f64>() / nf;
        let (sxx, sxy) = points.iter().fold((0.0, 0.0), |(sxx, sxy), (x, y)| {
            let dx = x - mean_x;
            (sxx + dx * dx, sxy + dx * (y - mean_y))
        });
        if sxx <= f64::EPSILON {
            return Err(InsufficientData::new("no spread in decision ages", n));
        }
        let slope = sxy / sxx;
        let intercept = mean_y - slope * mean_x;

        let (ss_res, ss_tot) = points.iter().fold((0.0, 0.0), |(res, tot), (x, y)| {
            let fitted = intercept + slope * x;
            (res + (y - fitted).powi(2), tot + (y - mean_y).powi(2))
        });
        let r_squared = if ss_tot <= f64::EPSILON {
            if ss_res <= f64::EPSILON {
                1.0
            } else {
                0.0
            }
        } else {
            1.0 - ss_res / ss_tot
        };

        Ok(DecayFit {
            rate: -slope,
            r_squared,
            n,
            intercept,
        })
    }

    /// Sources that (transitively) produced `source_id`, strongest first.
    ///
    /// Breadth-first over the lineage index; each step multiplies the path
    /// weight by the input's normalized weight. Only the strongest path to
    /// each ancestor is reported.
    pub fn get_ancestors(&self, source_id: &str, max_depth: usize) -> Vec<Ancestor> {
        let mut best: HashMap<String, (f64, usize)> = HashMap::new();
        let mut frontier: VecDeque<(String, f64, usize)> = VecDeque::new();
        frontier.push_back((source_id.to_string(), 1.0, 0));

        while let Some((node, weight, depth)) = frontier.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let Some(parents) = self.lineage.get(&node) else {
                continue;
            };
            for (parent, w) in parents {
                if parent == source_id {
                    continue;
                }
                let cumulative = weight * w;
                if best.get(parent).is_some_and(|(b, _)| *b >= cumulative) {
                    continue;
                }
                best.insert(parent.clone(), (cumulative, depth + 1));
                frontier.push_back((parent.clone(), cumulative, depth + 1));
            }
        }

        let mut ancestors: Vec<Ancestor> = best
            .into_iter()
            .map(|(source_id, (weight, depth))| Ancestor {
                source_id,
                weight,
                depth,
            })
            .collect();
        ancestors.sort_by(|a, b| {
            b.weight
                .total_cmp(&a.weight)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        ancestors
    }
}
