use mycelia::context::{DECISION, METRICS, MODE, TRANSMISSION};
use mycelia::{Colony, Mode, PolicyConfig};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

fn colony_in(dir: &std::path::Path) -> Colony {
    let mut config = PolicyConfig::default();
    config.graph.latency_unit_ms = 0;
    config.graph.seed = Some(1);
    config.bus.snapshot_path = Some(dir.join("trails.json"));
    config.ledger.log_path = Some(dir.join("decisions.jsonl"));
    config.reward.log_path = Some(dir.join("rewards.jsonl"));
    Colony::new(config).unwrap()
}

#[tokio::test]
async fn test_events_flow_into_components() {
    let dir = tempdir().unwrap();
    let colony = colony_in(dir.path());

    let modes = Arc::new(Mutex::new(Vec::new()));
    {
        let modes = Arc::clone(&modes);
        colony.bus.subscribe_fn(MODE, "mode-watcher", move |e| {
            modes.lock().unwrap().push(e.payload["mode"].clone());
            Ok(())
        });
    }

    for i in 0..6 {
        colony.bus.emit(
            json!({"category": TRANSMISSION, "source": "a", "target": "b", "body": {"i": i}}),
            0.4,
        );
    }
    colony.bus.emit(
        json!({
            "category": DECISION,
            "decision_type": "selection",
            "inputs": [{"source_id": "a", "weight": 3.0}, {"source_id": "b", "weight": 1.0}],
            "output": "c"
        }),
        0.7,
    );
    colony.bus.emit(
        json!({
            "category": METRICS,
            "system": {
                "artifact_rate": 15.0,
                "cascade_probability": 5.0,
                "continuity_ratio": 0.9,
                "building_ratio": 0.5
            }
        }),
        0.9,
    );

    // The metrics handler emits a mode event, which this drain also picks up.
    assert_eq!(colony.bus.drain().await, 9);

    assert_eq!(colony.graph.lock().await.edge("a", "b").unwrap().attempts, 6);
    {
        let ledger = colony.ledger.lock().unwrap();
        assert_eq!(ledger.total_logged(), 1);
        assert!((ledger.influence_of("a") - 0.75).abs() < 1e-9);
    }
    assert_eq!(colony.policy.lock().unwrap().mode(), Mode::Throttle);
    assert_eq!(*modes.lock().unwrap(), vec![json!("THROTTLE")]);

    colony.shutdown();
    assert!(dir.path().join("trails.json").exists());

    // A new colony over the same files picks up where this one stopped.
    let restarted = colony_in(dir.path());
    assert_eq!(restarted.ledger.lock().unwrap().total_logged(), 1);
    assert_eq!(restarted.policy.lock().unwrap().model().len(), 1);
    assert!(restarted.bus.get_pheromone_strength(TRANSMISSION) > 0.0);
}

#[tokio::test]
async fn test_malformed_events_are_contained() {
    let dir = tempdir().unwrap();
    let colony = colony_in(dir.path());

    colony
        .bus
        .emit(json!({"category": TRANSMISSION, "source": "only"}), 0.5);
    colony
        .bus
        .emit(json!({"category": DECISION, "decision_type": "x", "inputs": []}), 0.5);
    colony.bus.emit(
        json!({"category": METRICS, "system": {"artifact_rate": 1.0}}),
        0.5,
    );
    assert_eq!(colony.bus.drain().await, 3);

    assert!(colony.graph.lock().await.is_empty());
    assert_eq!(colony.ledger.lock().unwrap().total_logged(), 0);
    assert_eq!(colony.policy.lock().unwrap().model().len(), 0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = PolicyConfig::default();
    config.bus.decay_rate = 1.5;
    assert!(Colony::new(config).is_err());
}
