use mycelia::{apply_mode, health_score, regulate, Mode, RegulatorThresholds, SystemMetrics};
use proptest::prelude::*;

#[test]
fn test_overload_throttles() {
    let metrics = SystemMetrics {
        artifact_rate: 15.0,
        cascade_probability: 5.0,
        continuity_ratio: 0.9,
        building_ratio: 0.5,
    };
    assert_eq!(
        regulate(&metrics, &RegulatorThresholds::default()),
        Mode::Throttle
    );
}

#[test]
fn test_low_continuity_recovers() {
    let metrics = SystemMetrics {
        artifact_rate: 2.0,
        cascade_probability: 1.0,
        continuity_ratio: 0.3,
        building_ratio: 0.5,
    };
    assert_eq!(
        regulate(&metrics, &RegulatorThresholds::default()),
        Mode::Recover
    );
}

#[test]
fn test_override_table_is_static() {
    for mode in [
        Mode::Explore,
        Mode::Synthesize,
        Mode::Exploit,
        Mode::Throttle,
        Mode::Recover,
    ] {
        assert_eq!(apply_mode(mode), apply_mode(mode));
    }
    assert!(apply_mode(Mode::Throttle).cooldown_seconds > apply_mode(Mode::Explore).cooldown_seconds);
}

fn metrics_strategy() -> impl Strategy<Value = SystemMetrics> {
    (0.0f64..30.0, 0.0f64..10.0, 0.0f64..=1.0, 0.0f64..=1.0).prop_map(|(ar, cp, cr, br)| {
        SystemMetrics {
            artifact_rate: ar,
            cascade_probability: cp,
            continuity_ratio: cr,
            building_ratio: br,
        }
    })
}

proptest! {
    #[test]
    fn prop_regulate_is_pure(m in metrics_strategy()) {
        let t = RegulatorThresholds::default();
        prop_assert_eq!(regulate(&m, &t), regulate(&m, &t));
    }

    #[test]
    fn prop_health_score_in_unit_interval(m in metrics_strategy()) {
        let h = health_score(&m, &RegulatorThresholds::default());
        prop_assert!((0.0..=1.0).contains(&h));
    }

    #[test]
    fn prop_overload_always_throttles(m in metrics_strategy(), extra in 0.1f64..100.0) {
        let t = RegulatorThresholds::default();
        let overloaded = SystemMetrics { artifact_rate: t.artifact_rate.max + extra, ..m };
        prop_assert_eq!(regulate(&overloaded, &t), Mode::Throttle);
    }
}
