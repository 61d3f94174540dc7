//! Evaluate the homeostatic regulator on sample metrics.
//!
//! Usage:
//!   cargo run --bin run-regulator-demo
//!   cargo run --bin run-regulator-demo -- <artifact_rate> <cascade_probability> <continuity_ratio> <building_ratio>

use mycelia::{apply_mode, health_score, regulate, PolicyConfig, SystemMetrics};
use tracing_subscriber::EnvFilter;

fn samples() -> Vec<(&'static str, SystemMetrics)> {
    vec![
        (
            "overloaded",
            SystemMetrics {
                artifact_rate: 15.0,
                cascade_probability: 5.0,
                continuity_ratio: 0.9,
                building_ratio: 0.5,
            },
        ),
        (
            "broken continuity",
            SystemMetrics {
                artifact_rate: 2.0,
                cascade_probability: 1.0,
                continuity_ratio: 0.3,
                building_ratio: 0.5,
            },
        ),
        (
            "idle",
            SystemMetrics {
                artifact_rate: 1.0,
                cascade_probability: 0.5,
                continuity_ratio: 0.95,
                building_ratio: 0.2,
            },
        ),
        (
            "productive",
            SystemMetrics {
                artifact_rate: 6.0,
                cascade_probability: 2.7,
                continuity_ratio: 0.92,
                building_ratio: 0.7,
            },
        ),
        (
            "balanced",
            SystemMetrics {
                artifact_rate: 5.0,
                cascade_probability: 2.0,
                continuity_ratio: 0.9,
                building_ratio: 0.45,
            },
        ),
    ]
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = PolicyConfig::from_env()?;
    let thresholds = &config.regulator;

    let args: Vec<f64> = std::env::args()
        .skip(1)
        .map(|a| a.parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| anyhow::anyhow!("metrics must be numbers: {e}"))?;

    let cases = match args.as_slice() {
        [] => samples(),
        [ar, cp, cr, br] => vec![(
            "custom",
            SystemMetrics {
                artifact_rate: *ar,
                cascade_probability: *cp,
                continuity_ratio: *cr,
                building_ratio: *br,
            },
        )],
        _ => anyhow::bail!(
            "expected 0 or 4 arguments: artifact_rate cascade_probability continuity_ratio building_ratio"
        ),
    };

    for (name, metrics) in cases {
        let mode = regulate(&metrics, thresholds);
        let overrides = apply_mode(mode);
        println!(
            "{name:<18} mode {:<10} health {:.2}  novelty_floor {:.2}  max_iterations {}  cooldown {}s",
            mode.to_string(),
            health_score(&metrics, thresholds),
            overrides.novelty_floor,
            overrides.max_iterations,
            overrides.cooldown_seconds,
        );
    }
    Ok(())
}
