use chrono::{Duration, Utc};
use mycelia::{BusConfig, Event, EventBus, WILDCARD};
use proptest::prelude::*;
use serde_json::json;
use std::sync::{Arc, Mutex};

fn wildcard_recorder(bus: &EventBus) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe_fn(WILDCARD, "wildcard-recorder", move |e| {
        sink.lock().unwrap().push(e.clone());
        Ok(())
    });
    seen
}

#[tokio::test]
async fn test_wildcard_receives_every_priority_level() {
    let bus = Arc::new(EventBus::new(BusConfig {
        poll_interval_ms: 10,
        ..Default::default()
    }));
    let seen = wildcard_recorder(&bus);

    for p in [0.0, 0.25, 0.5, 0.75, 1.0] {
        assert_eq!(bus.emit(json!({"category": "test", "p": p}), p), 1);
    }

    let runner = {
        let bus = Arc::clone(&bus);
        tokio::spawn(async move { bus.process_events().await })
    };
    for _ in 0..200 {
        if seen.lock().unwrap().len() == 5 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    bus.stop();
    runner.await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 5);
    let priorities: Vec<f64> = seen.iter().map(|e| e.priority).collect();
    assert_eq!(priorities, vec![1.0, 0.75, 0.5, 0.25, 0.0]);
    assert!(bus.get_pheromone_strength("test") > 0.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_lose_nothing() {
    let bus = Arc::new(EventBus::new(BusConfig::default()));
    let seen = wildcard_recorder(&bus);

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let bus = Arc::clone(&bus);
            std::thread::spawn(move || {
                for i in 0..50 {
                    bus.emit(json!({"category": format!("c{p}"), "i": i}), 0.5);
                }
            })
        })
        .collect();
    for handle in producers {
        handle.join().unwrap();
    }

    assert_eq!(bus.pending(), 200);
    assert_eq!(bus.drain().await, 200);
    assert_eq!(seen.lock().unwrap().len(), 200);
    for p in 0..4 {
        assert_eq!(
            bus.trails()
                .iter()
                .find(|t| t.category == format!("c{p}"))
                .unwrap()
                .emission_count,
            50
        );
    }
}

#[tokio::test]
async fn test_stop_before_loop_returns_immediately() {
    let bus = EventBus::new(BusConfig::default());
    bus.emit(json!({"category": "late"}), 0.5);
    bus.stop();
    bus.process_events().await;
    assert!(bus.is_stopped());
    assert_eq!(bus.pending(), 1);
}

proptest! {
    #[test]
    fn prop_strength_never_grows_without_emission(
        priorities in prop::collection::vec(0.0f64..=1.0, 1..20),
        steps in prop::collection::vec(0i64..10_000, 1..20),
    ) {
        let bus = EventBus::new(BusConfig::default());
        let t0 = Utc::now();
        for p in &priorities {
            bus.emit_at(json!({"category": "trail"}), *p, t0);
        }
        let mut now = t0;
        let mut last = bus.get_pheromone_strength_at("trail", now);
        prop_assert!(last <= bus.config().max_strength);
        for s in steps {
            now += Duration::minutes(s);
            let s = bus.get_pheromone_strength_at("trail", now);
            prop_assert!(s <= last + 1e-12);
            prop_assert!(s >= 0.0);
            last = s;
        }
    }
}
