//! Mycelia: a lightweight event-driven coordination layer.
//!
//! - [`bus`]: pheromone-weighted publish/subscribe with a priority queue
//! - [`graph`]: reinforcement-learned throughput between named participants
//! - [`ledger`]: append-only causal attribution log with decay-rate fitting
//! - [`reward`] / [`policy`]: fixed-weight reward and the regulator feedback loop
//! - [`context`]: one explicit [`Colony`] wiring it all together

pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod journal;
pub mod ledger;
pub mod policy;
pub mod reward;

pub use bus::{Event, EventBus, EventHandler, FnHandler, UNKNOWN_CATEGORY, WILDCARD};
pub use config::{BusConfig, GraphConfig, LedgerConfig, PolicyConfig, RewardConfig};
pub use context::Colony;
pub use error::{MyceliaError, Result};
pub use graph::{ConnectionGraph, Edge, GraphStats};
pub use ledger::{Ancestor, CausalLedger, DecayFit, Decision, InfluenceInput, WeightedInput};
pub use mycelia_core::{
    apply_mode, health_score, regulate, InsufficientData, MetricBand, Mode, PolicyOverrides,
    RegulatorThresholds, SystemMetrics, TemporalWeighting, Trail,
};
pub use policy::{PolicyLoop, PolicyUpdate};
pub use reward::{RewardMetrics, RewardModel, RewardRecord, RewardStats};
