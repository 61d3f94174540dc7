//! Summarize a decision log: volume, top influencers, fitted decay rate.
//!
//! Usage:
//!   cargo run --bin run-ledger-report -- [path/to/decisions.jsonl] [--window 30]

use mycelia::{CausalLedger, PolicyConfig};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG: &str = "mycelia/decisions.jsonl";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let window_pos = args.iter().position(|a| a == "--window");
    let mut config = PolicyConfig::from_env()?;
    let window = window_pos
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(config.ledger.window_days);
    let path = args
        .iter()
        .enumerate()
        .find(|(i, a)| !a.starts_with("--") && window_pos.is_none_or(|w| *i != w + 1))
        .map(|(_, a)| PathBuf::from(a))
        .or_else(|| config.ledger.log_path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG));

    config.ledger.log_path = Some(path.clone());
    config.ledger.recent_capacity = usize::MAX;
    let ledger = CausalLedger::open(config.ledger)?;

    println!("== Decision log: {} ==", path.display());
    println!("decisions: {}", ledger.total_logged());

    let mut by_type: BTreeMap<&str, usize> = BTreeMap::new();
    for decision in ledger.recent() {
        *by_type.entry(decision.decision_type.as_str()).or_default() += 1;
    }
    for (decision_type, count) in &by_type {
        println!("  {decision_type:<20} {count}");
    }

    println!("== Top influencers ==");
    for (source, influence) in ledger.top_influencers(10) {
        println!("  {source:<30} {influence:.3}");
    }

    println!("== Decay rate (window {window} days, raw weights) ==");
    let types: Vec<Option<&str>> = std::iter::once(None)
        .chain(by_type.keys().map(|t| Some(*t)))
        .collect();
    for decision_type in types {
        let label = decision_type.unwrap_or("all");
        match ledger.compute_decay_rate(decision_type, window, true) {
            Ok(fit) => println!(
                "  {label:<20} rate {:.4}/day  r2 {:.3}  n {}",
                fit.rate, fit.r_squared, fit.n
            ),
            Err(diag) => println!("  {label:<20} {}", serde_json::to_string(&diag)?),
        }
    }
    Ok(())
}
