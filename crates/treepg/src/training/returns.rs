//! Reward shaping for the policy gradient.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Reverse discounted cumulative sums: `Q_t = sum_{t' >= t} gamma^(t' - t) r_t'`.
pub fn discounted_returns(rewards: &[f32], gamma: f32) -> Array1<f32> {
    let mut returns = Array1::zeros(rewards.len());
    let mut running = 0.0f32;
    for (t, &reward) in rewards.iter().enumerate().rev() {
        running = reward + gamma * running;
        returns[t] = running;
    }
    returns
}

/// Linear map of ratings from `[min, max]` onto `[-1, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RatingScale {
    pub min: f32,
    pub max: f32,
}

impl Default for RatingScale {
    fn default() -> Self {
        Self { min: 0.0, max: 5.0 }
    }
}

impl RatingScale {
    pub fn normalize(&self, rating: f32) -> f32 {
        -1.0 + 2.0 * (rating - self.min) / (self.max - self.min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undiscounted_returns_are_reverse_cumsum() {
        let returns = discounted_returns(&[1.0, -0.5, 2.0], 1.0);
        assert_eq!(returns.to_vec(), vec![2.5, 1.5, 2.0]);
    }

    #[test]
    fn test_discounted_returns() {
        let returns = discounted_returns(&[1.0, 1.0, 1.0], 0.5);
        assert_eq!(returns.to_vec(), vec![1.75, 1.5, 1.0]);
        assert!(discounted_returns(&[], 0.9).is_empty());
    }

    #[test]
    fn test_rating_scale() {
        let scale = RatingScale::default();
        assert_eq!(scale.normalize(0.0), -1.0);
        assert_eq!(scale.normalize(2.5), 0.0);
        assert_eq!(scale.normalize(5.0), 1.0);
    }
}
