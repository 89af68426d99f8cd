//! Transition accumulation between policy updates.

use super::returns::discounted_returns;
use crate::{Result, TreePgError};
use candle_core::{Device, Tensor};
use ndarray::{Array1, Array2};

/// Transitions `(state, action, reward)` collected by the caller until the
/// next policy update.
#[derive(Clone, Debug)]
pub struct TransitionBatch {
    state_dim: usize,
    states: Vec<f32>,
    actions: Vec<usize>,
    rewards: Vec<f32>,
}

impl TransitionBatch {
    pub fn new(state_dim: usize) -> Self {
        Self {
            state_dim,
            states: Vec::new(),
            actions: Vec::new(),
            rewards: Vec::new(),
        }
    }

    pub fn push(&mut self, state: &[f32], action: usize, reward: f32) -> Result<()> {
        if state.len() != self.state_dim {
            return Err(TreePgError::InvalidInput(format!(
                "state has width {}, batch holds width {}",
                state.len(),
                self.state_dim
            )));
        }
        self.states.extend_from_slice(state);
        self.actions.push(action);
        self.rewards.push(reward);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn clear(&mut self) {
        self.states.clear();
        self.actions.clear();
        self.rewards.clear();
    }

    pub fn actions(&self) -> &[usize] {
        &self.actions
    }

    pub fn rewards(&self) -> &[f32] {
        &self.rewards
    }

    /// States as an `[N, state_dim]` array.
    pub fn states(&self) -> Result<Array2<f32>> {
        Array2::from_shape_vec((self.len(), self.state_dim), self.states.clone())
            .map_err(|e| TreePgError::InvalidInput(format!("state batch: {}", e)))
    }

    pub fn states_tensor(&self, device: &Device) -> Result<Tensor> {
        let states = self.states()?;
        let data = states
            .as_slice()
            .ok_or_else(|| TreePgError::InvalidInput("state batch is not contiguous".into()))?;
        Ok(Tensor::from_slice(data, states.dim(), device)?)
    }

    /// Discounted returns of the batch rewards, treated as one trajectory.
    pub fn returns(&self, gamma: f32) -> Array1<f32> {
        discounted_returns(&self.rewards, gamma)
    }
}
