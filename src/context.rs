//! Process-wide context: one bus, graph, ledger and policy loop, built once
//! from a [`PolicyConfig`] and wired together through the bus.
//!
//! | category       | handler          | effect                                   |
//! |----------------|------------------|------------------------------------------|
//! | `transmission` | [`GraphRelay`]   | `ConnectionGraph::send(source, target)`  |
//! | `decision`     | [`LedgerRecorder`] | `CausalLedger::log_decision`           |
//! | `metrics`      | [`RegulatorFeed`]  | `PolicyLoop::step`, then emits `mode`  |

use crate::bus::{Event, EventBus, EventHandler};
use crate::config::PolicyConfig;
use crate::error::Result;
use crate::graph::ConnectionGraph;
use crate::ledger::{CausalLedger, InfluenceInput};
use crate::policy::PolicyLoop;
use crate::reward::{RewardMetrics, RewardModel};
use anyhow::{anyhow, Context as _};
use async_trait::async_trait;
use mycelia_core::SystemMetrics;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::info;

pub const TRANSMISSION: &str = "transmission";
pub const DECISION: &str = "decision";
pub const METRICS: &str = "metrics";
pub const MODE: &str = "mode";

pub struct Colony {
    pub config: PolicyConfig,
    pub bus: Arc<EventBus>,
    pub graph: Arc<tokio::sync::Mutex<ConnectionGraph>>,
    pub ledger: Arc<Mutex<CausalLedger>>,
    pub policy: Arc<Mutex<PolicyLoop>>,
}

impl Colony {
    /// Validate `config`, replay any existing logs, and subscribe the
    /// built-in handlers.
    pub fn new(config: PolicyConfig) -> Result<Self> {
        config.validate()?;
        let bus = Arc::new(EventBus::new(config.bus.clone()));
        let graph = Arc::new(tokio::sync::Mutex::new(ConnectionGraph::new(
            config.graph.clone(),
        )));
        let ledger = Arc::new(Mutex::new(CausalLedger::open(config.ledger.clone())?));
        let model = RewardModel::open(config.reward.clone())?;
        let policy = Arc::new(Mutex::new(PolicyLoop::new(
            config.regulator.clone(),
            model,
        )));

        bus.subscribe(
            TRANSMISSION,
            Arc::new(GraphRelay {
                graph: Arc::clone(&graph),
            }),
        );
        bus.subscribe(
            DECISION,
            Arc::new(LedgerRecorder {
                ledger: Arc::clone(&ledger),
            }),
        );
        bus.subscribe(
            METRICS,
            Arc::new(RegulatorFeed {
                policy: Arc::clone(&policy),
                bus: Arc::downgrade(&bus),
            }),
        );
        info!("Colony initialized");

        Ok(Self {
            config,
            bus,
            graph,
            ledger,
            policy,
        })
    }

    /// Stop the bus and flush anything still pending on disk.
    pub fn shutdown(&self) {
        self.bus.stop();
        if let Ok(mut ledger) = self.ledger.lock() {
            ledger.flush();
        }
        if let Ok(mut policy) = self.policy.lock() {
            policy.model_mut().flush();
        }
    }
}

/// Relays `transmission` events over the connection graph.
pub struct GraphRelay {
    graph: Arc<tokio::sync::Mutex<ConnectionGraph>>,
}

#[async_trait]
impl EventHandler for GraphRelay {
    fn name(&self) -> &str {
        "graph-relay"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let source = event
            .str_field("source")
            .ok_or_else(|| anyhow!("transmission without source"))?;
        let target = event
            .str_field("target")
            .ok_or_else(|| anyhow!("transmission without target"))?;
        let body = event.payload.get("body").cloned().unwrap_or(Value::Null);
        self.graph.lock().await.send(source, target, &body).await;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct DecisionRequest {
    decision_type: String,
    inputs: Vec<InfluenceInput>,
    #[serde(default)]
    output: String,
    #[serde(default)]
    metadata: Map<String, Value>,
}

/// Logs `decision` events into the causal ledger.
pub struct LedgerRecorder {
    ledger: Arc<Mutex<CausalLedger>>,
}

#[async_trait]
impl EventHandler for LedgerRecorder {
    fn name(&self) -> &str {
        "ledger-recorder"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let request: DecisionRequest = serde_json::from_value(Value::Object(event.payload.clone()))
            .context("malformed decision event")?;
        let mut ledger = self
            .ledger
            .lock()
            .map_err(|_| anyhow!("ledger lock poisoned"))?;
        ledger.log_decision(
            &request.decision_type,
            request.inputs,
            request.output,
            request.metadata,
            Some(event.timestamp),
        )?;
        Ok(())
    }
}

/// Feeds `metrics` events to the policy loop and announces the resulting
/// mode on the bus.
pub struct RegulatorFeed {
    policy: Arc<Mutex<PolicyLoop>>,
    bus: Weak<EventBus>,
}

#[async_trait]
impl EventHandler for RegulatorFeed {
    fn name(&self) -> &str {
        "regulator-feed"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let system: HashMap<String, f64> = event
            .payload
            .get("system")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .context("system metrics must be numbers")?
            .unwrap_or_default();
        let system = SystemMetrics::from_observations(&system)?;
        let artifact: RewardMetrics = match event.payload.get("artifact") {
            Some(v) => serde_json::from_value(v.clone()).context("malformed artifact metrics")?,
            None => RewardMetrics::default(),
        };

        let update = self
            .policy
            .lock()
            .map_err(|_| anyhow!("policy lock poisoned"))?
            .step(&system, &artifact);

        if let Some(bus) = self.bus.upgrade() {
            bus.emit(
                json!({
                    "category": MODE,
                    "mode": update.mode,
                    "previous_mode": update.previous_mode,
                    "overrides": update.overrides,
                    "health": update.health,
                    "reward": update.record.reward,
                    "accepted": update.accepted,
                }),
                0.5,
            );
        }
        Ok(())
    }
}
