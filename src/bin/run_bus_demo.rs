//! Drive a colony through a short burst of traffic and print what it learned.
//!
//! Usage:
//!   cargo run --bin run-bus-demo -- [--events 40] [--seed 7]
//!   MYCELIA_CONFIG=policy.toml cargo run --bin run-bus-demo

use mycelia::context::{DECISION, METRICS, TRANSMISSION};
use mycelia::{Colony, PolicyConfig, WILDCARD};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const PARTICIPANTS: [&str; 4] = ["scout", "builder", "archivist", "critic"];
const DEMO_POLL_INTERVAL_MS: u64 = 50;
const DEMO_LATENCY_UNIT_MS: u64 = 1;

fn arg_value(args: &[String], flag: &str) -> Option<u64> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}

/// Speed the demo up, unless the policy file chose its own timings.
fn apply_demo_timings(config: &mut PolicyConfig) {
    let defaults = PolicyConfig::default();
    if config.bus.poll_interval_ms == defaults.bus.poll_interval_ms {
        config.bus.poll_interval_ms = DEMO_POLL_INTERVAL_MS;
        info!(poll_interval_ms = DEMO_POLL_INTERVAL_MS, "Using demo poll interval");
    }
    if config.graph.latency_unit_ms == defaults.graph.latency_unit_ms {
        config.graph.latency_unit_ms = DEMO_LATENCY_UNIT_MS;
        info!(latency_unit_ms = DEMO_LATENCY_UNIT_MS, "Using demo latency unit");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let events = arg_value(&args, "--events").unwrap_or(40) as usize;

    let mut config = PolicyConfig::from_env()?;
    apply_demo_timings(&mut config);
    if let Some(seed) = arg_value(&args, "--seed") {
        config.graph.seed = Some(seed);
    }
    let colony = Colony::new(config)?;

    let seen = Arc::new(AtomicUsize::new(0));
    {
        let seen = Arc::clone(&seen);
        colony.bus.subscribe_fn(WILDCARD, "demo-counter", move |_| {
            seen.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
    }

    let runner = {
        let bus = Arc::clone(&colony.bus);
        tokio::spawn(async move { bus.process_events().await })
    };

    for i in 0..events {
        let source = PARTICIPANTS[i % PARTICIPANTS.len()];
        let target = PARTICIPANTS[(i * 3 + 1) % PARTICIPANTS.len()];
        colony.bus.emit(
            json!({"category": TRANSMISSION, "source": source, "target": target, "body": {"seq": i}}),
            0.3 + 0.5 * ((i % 5) as f64 / 4.0),
        );
        if i % 4 == 0 {
            colony.bus.emit(
                json!({
                    "category": DECISION,
                    "decision_type": "selection",
                    "inputs": [
                        {"source_id": source, "weight": 0.7, "reason": "recent success"},
                        {"source_id": target, "weight": 0.3}
                    ],
                    "output": format!("artifact-{i}"),
                }),
                0.6,
            );
        }
    }
    colony.bus.emit(
        json!({
            "category": METRICS,
            "system": {
                "artifact_rate": 7.0,
                "cascade_probability": 2.8,
                "continuity_ratio": 0.93,
                "building_ratio": 0.65
            },
            "artifact": {
                "correctness": 0.95,
                "performance": 0.9,
                "complexity": 0.25,
                "novelty": 0.8,
                "building_signal": 0.95
            }
        }),
        0.9,
    );

    while colony.bus.pending() > 0 {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    colony.shutdown();
    runner.await?;

    println!("== Event bus ==");
    println!("events delivered to wildcard: {}", seen.load(Ordering::Relaxed));
    for (category, strength) in colony.bus.get_strongest_trails(5) {
        println!("  trail {category:<14} strength {strength:.3}");
    }

    println!("== Connection graph ==");
    let graph = colony.graph.lock().await;
    let stats = graph.get_statistics();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    for edge in graph.get_highways(1.0) {
        println!(
            "  {} -> {}  throughput {:.2}  health {:.2}",
            edge.source, edge.target, edge.throughput, edge.health
        );
    }

    println!("== Policy ==");
    let policy = colony
        .policy
        .lock()
        .map_err(|_| anyhow::anyhow!("policy lock poisoned"))?;
    println!("mode: {}", policy.mode());
    println!("{}", serde_json::to_string_pretty(policy.overrides())?);

    let ledger = colony
        .ledger
        .lock()
        .map_err(|_| anyhow::anyhow!("ledger lock poisoned"))?;
    println!("== Ledger ==");
    println!("decisions logged: {}", ledger.total_logged());

    info!("Demo finished");
    Ok(())
}
