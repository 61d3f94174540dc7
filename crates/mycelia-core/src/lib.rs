//! Embeddable core for mycelia: trails, temporal weighting, homeostatic regulation.

pub mod diagnostics;
pub mod regulator;
pub mod trail;

pub use diagnostics::InsufficientData;
pub use regulator::{
    apply_mode, health_score, regulate, MetricBand, Mode, PolicyOverrides, RegulatorThresholds,
    SystemMetrics,
};
pub use trail::{hours_between, AgeBracket, TemporalWeighting, Trail};
