//! Policy loop: regulator mode -> policy overrides -> reward.

use crate::reward::{RewardMetrics, RewardModel, RewardRecord};
use mycelia_core::{
    apply_mode, health_score, regulate, Mode, PolicyOverrides, RegulatorThresholds, SystemMetrics,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyUpdate {
    pub mode: Mode,
    pub previous_mode: Mode,
    pub overrides: PolicyOverrides,
    /// Regulator health score for the observed metrics.
    pub health: f64,
    /// Whether the artifact cleared the mode's novelty floor.
    pub accepted: bool,
    pub record: RewardRecord,
}

#[derive(Debug)]
pub struct PolicyLoop {
    thresholds: RegulatorThresholds,
    model: RewardModel,
    mode: Mode,
    overrides: PolicyOverrides,
}

impl PolicyLoop {
    pub fn new(thresholds: RegulatorThresholds, model: RewardModel) -> Self {
        let mode = Mode::default();
        Self {
            thresholds,
            model,
            mode,
            overrides: apply_mode(mode),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn overrides(&self) -> &PolicyOverrides {
        &self.overrides
    }

    pub fn thresholds(&self) -> &RegulatorThresholds {
        &self.thresholds
    }

    pub fn model(&self) -> &RewardModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut RewardModel {
        &mut self.model
    }

    /// Re-regulate from `system`, adopt the mode's overrides, then score
    /// the artifact described by `artifact`.
    pub fn step(&mut self, system: &SystemMetrics, artifact: &RewardMetrics) -> PolicyUpdate {
        let previous_mode = self.mode;
        let mode = regulate(system, &self.thresholds);
        let health = health_score(system, &self.thresholds);
        if mode != previous_mode {
            info!(from = %previous_mode, to = %mode, health, "Mode transition");
        }
        self.mode = mode;
        self.overrides = apply_mode(mode);

        let record = self.model.compute_reward(artifact);
        let accepted = artifact.sanitized().novelty >= self.overrides.novelty_floor;
        PolicyUpdate {
            mode,
            previous_mode,
            overrides: self.overrides,
            health,
            accepted,
            record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RewardConfig;

    #[test]
    fn test_mode_drives_novelty_floor() {
        let mut policy = PolicyLoop::new(
            RegulatorThresholds::default(),
            RewardModel::new(RewardConfig::default()),
        );
        assert_eq!(policy.mode(), Mode::Synthesize);

        let overloaded = SystemMetrics {
            artifact_rate: 15.0,
            cascade_probability: 5.0,
            continuity_ratio: 0.9,
            building_ratio: 0.5,
        };
        let artifact = RewardMetrics {
            novelty: 0.7,
            ..Default::default()
        };
        let update = policy.step(&overloaded, &artifact);
        assert_eq!(update.previous_mode, Mode::Synthesize);
        assert_eq!(update.mode, Mode::Throttle);
        assert!(!update.accepted, "throttle raises the novelty floor to 0.8");
        assert_eq!(policy.model().len(), 1);

        let quiet = SystemMetrics {
            artifact_rate: 1.0,
            cascade_probability: 0.5,
            continuity_ratio: 0.95,
            building_ratio: 0.4,
        };
        let update = policy.step(&quiet, &artifact);
        assert_eq!(update.mode, Mode::Explore);
        assert!(update.accepted);
        assert_eq!(policy.overrides().cooldown_seconds, 30);
    }
}
