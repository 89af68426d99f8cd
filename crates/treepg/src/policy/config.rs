//! Tree policy configuration.

use crate::{Result, TreePgError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How node parameters are shared across the tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SharingMode {
    /// One softmax node network evaluated at every depth and position.
    Global,
    /// One softmax node network per depth, applied to every node at that depth.
    PerDepth,
    /// One softmax node network per internal tree node.
    PerNode,
    /// One logits network per depth, refined by a per-position relu/softmax head.
    #[default]
    PerDepthRefined,
    /// One logits network for all depths, refined by a per-position relu/softmax head.
    GlobalRefined,
}

impl SharingMode {
    pub const ALL: [SharingMode; 5] = [
        SharingMode::Global,
        SharingMode::PerDepth,
        SharingMode::PerNode,
        SharingMode::PerDepthRefined,
        SharingMode::GlobalRefined,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SharingMode::Global => "global",
            SharingMode::PerDepth => "per-depth",
            SharingMode::PerNode => "per-node",
            SharingMode::PerDepthRefined => "per-depth-refined",
            SharingMode::GlobalRefined => "global-refined",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SharingMode::Global => "single softmax node shared by every depth and position",
            SharingMode::PerDepth => "one softmax node per depth",
            SharingMode::PerNode => "independent softmax node per internal tree node",
            SharingMode::PerDepthRefined => "per-depth base with per-position refinement",
            SharingMode::GlobalRefined => "single base with per-position refinement",
        }
    }

    /// Whether positions below the root get their own refinement head.
    pub fn is_refined(&self) -> bool {
        matches!(
            self,
            SharingMode::PerDepthRefined | SharingMode::GlobalRefined
        )
    }
}

impl fmt::Display for SharingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SharingMode {
    type Err = TreePgError;

    fn from_str(s: &str) -> Result<Self> {
        SharingMode::ALL
            .iter()
            .copied()
            .find(|mode| mode.name() == s)
            .ok_or_else(|| TreePgError::InvalidConfig(format!("unknown sharing mode '{}'", s)))
    }
}

/// Configuration for [`TreePolicy`](super::TreePolicy)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreePolicyConfig {
    /// Tree depth
    pub layer: usize,
    /// Fan-out of every internal node
    pub branch: usize,
    /// Width of the input state vectors
    pub state_dim: usize,
    /// Hidden width of the node networks
    pub hidden_size: usize,
    /// Adam learning rate
    pub learning_rate: f64,
    /// Seed for parameter initialization
    pub seed: u64,
    /// Parameter sharing mode
    pub sharing: SharingMode,
}

impl Default for TreePolicyConfig {
    fn default() -> Self {
        Self {
            layer: 3,
            branch: 32,
            state_dim: 64,
            hidden_size: 64,
            learning_rate: 1e-4,
            seed: 1,
            sharing: SharingMode::default(),
        }
    }
}

impl TreePolicyConfig {
    /// Number of leaves (`branch^layer`), or `None` on overflow.
    pub fn action_space(&self) -> Option<usize> {
        self.branch.checked_pow(u32::try_from(self.layer).ok()?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.layer == 0 {
            return Err(TreePgError::InvalidConfig("layer must be >= 1".into()));
        }
        if self.branch < 2 {
            return Err(TreePgError::InvalidConfig("branch must be >= 2".into()));
        }
        if self.state_dim == 0 {
            return Err(TreePgError::InvalidConfig("state_dim must be >= 1".into()));
        }
        if self.hidden_size == 0 {
            return Err(TreePgError::InvalidConfig("hidden_size must be >= 1".into()));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(TreePgError::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.action_space().is_none() {
            return Err(TreePgError::InvalidConfig(format!(
                "action space {}^{} overflows",
                self.branch, self.layer
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TreePolicyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.action_space(), Some(32 * 32 * 32));
        assert_eq!(config.sharing, SharingMode::PerDepthRefined);
    }

    #[test]
    fn test_rejects_degenerate_tree() {
        let config = TreePolicyConfig {
            branch: 1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TreePgError::InvalidConfig(_))
        ));

        let config = TreePolicyConfig {
            layer: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_overflowing_action_space() {
        let config = TreePolicyConfig {
            branch: 1 << 20,
            layer: 8,
            ..Default::default()
        };
        assert!(config.action_space().is_none());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sharing_mode_names_round_trip() {
        for mode in SharingMode::ALL {
            assert_eq!(mode.name().parse::<SharingMode>().unwrap(), mode);
        }
        assert!("bogus".parse::<SharingMode>().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = TreePolicyConfig {
            sharing: SharingMode::PerNode,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"per-node\""));
        let restored: TreePolicyConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, restored);
    }
}
