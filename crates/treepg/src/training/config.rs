//! Trainer and experiment configuration.

use super::returns::RatingScale;
use crate::policy::{EncoderConfig, TreePolicyConfig};
use crate::synthetic::SyntheticConfig;
use crate::{Result, TreePgError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for [`SessionTrainer`](super::SessionTrainer)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Transitions per policy update
    pub batch_size: usize,
    /// Discount factor for returns
    pub gamma: f32,
    /// Rating range mapped onto [-1, 1] rewards
    pub rating_scale: RatingScale,
    /// Discard transitions left over at the end of a session
    pub drop_partial: bool,
    /// Number of sessions used for encoder pre-training
    pub pretrain_sessions: usize,
    /// Save a checkpoint every N policy updates (0 disables)
    pub checkpoint_interval: u64,
    /// Directory for checkpoints
    pub checkpoint_dir: PathBuf,
    /// Show a progress bar while training
    pub show_progress: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            gamma: 1.0,
            rating_scale: RatingScale::default(),
            drop_partial: true,
            pretrain_sessions: 100,
            checkpoint_interval: 0,
            checkpoint_dir: PathBuf::from("checkpoints"),
            show_progress: false,
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(TreePgError::InvalidConfig("batch_size must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(TreePgError::InvalidConfig(format!(
                "gamma must be in [0, 1], got {}",
                self.gamma
            )));
        }
        if self.rating_scale.max <= self.rating_scale.min {
            return Err(TreePgError::InvalidConfig(
                "rating_scale.max must exceed rating_scale.min".into(),
            ));
        }
        Ok(())
    }
}

/// Everything needed to run one experiment, loadable from JSON.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub policy: TreePolicyConfig,
    pub encoder: EncoderConfig,
    pub trainer: TrainerConfig,
    pub synthetic: SyntheticConfig,
}

impl ExperimentConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Wire the encoder to the synthetic embedding width and the policy to the
    /// encoder state width.
    pub fn aligned(mut self) -> Self {
        self.encoder.input_dim = self.synthetic.embedding_dim + 1;
        self.policy.state_dim = self.encoder.hidden_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.policy.validate()?;
        self.encoder.validate()?;
        self.trainer.validate()?;
        self.synthetic.validate()?;
        if self.policy.state_dim != self.encoder.hidden_size {
            return Err(TreePgError::InvalidConfig(format!(
                "policy state_dim {} differs from encoder hidden_size {}",
                self.policy.state_dim, self.encoder.hidden_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "policy": { "branch": 4, "layer": 2, "sharing": "per-depth" },
                        "trainer": { "batch_size": 8 } }"#;
        let config: ExperimentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.policy.branch, 4);
        assert_eq!(config.policy.learning_rate, 1e-4);
        assert_eq!(config.trainer.batch_size, 8);
        assert_eq!(config.trainer.gamma, 1.0);
        assert!(config.aligned().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_trainer_config() {
        let config = TrainerConfig {
            gamma: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
