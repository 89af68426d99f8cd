//! Hierarchical softmax policy trained with REINFORCE.

use super::codec::ActionCodec;
use super::config::TreePolicyConfig;
use super::init::seeded_init;
use super::node::TreeLayout;
use super::HasVarMap;
use crate::checkpoint::{Checkpointable, ModelSnapshot};
use crate::{Result, TreePgError};
use candle_core::{DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::Path;

/// Floor added to leaf probabilities before taking the log.
pub const LOG_EPSILON: f64 = 1e-13;

/// Softmax policy over `branch^layer` leaves, factorized into a balanced tree
/// of local `branch`-way decisions.
///
/// The probability of leaf `k` is the product of the local probabilities of
/// its branch digits (see [`ActionCodec`]) from the root down.
pub struct TreePolicy {
    config: TreePolicyConfig,
    codec: ActionCodec,
    vs: VarMap,
    layout: TreeLayout,
    optimizer: AdamW,
    device: Device,
    steps: u64,
}

impl TreePolicy {
    /// Create a new tree policy with parameters drawn from `config.seed`
    pub fn new(config: TreePolicyConfig, device: Device) -> Result<Self> {
        config.validate()?;
        let codec = ActionCodec::new(config.branch, config.layer)?;

        let vs = VarMap::new();
        let vb = VarBuilder::from_varmap(&vs, DType::F32, &device);
        let layout = TreeLayout::build(&config, vb.pp("tree"))?;

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        seeded_init(&vs, &mut rng, &device)?;

        let optimizer = AdamW::new(
            vs.all_vars(),
            ParamsAdamW {
                lr: config.learning_rate,
                beta1: 0.9,
                beta2: 0.999,
                eps: 1e-8,
                weight_decay: 0.0,
            },
        )?;

        let policy = Self {
            config,
            codec,
            vs,
            layout,
            optimizer,
            device,
            steps: 0,
        };
        tracing::debug!(
            layer = policy.config.layer,
            branch = policy.config.branch,
            sharing = %policy.config.sharing,
            actions = policy.codec.num_leaves(),
            params = policy.num_parameters(),
            "Created tree policy"
        );
        Ok(policy)
    }

    pub fn config(&self) -> &TreePolicyConfig {
        &self.config
    }

    pub fn codec(&self) -> &ActionCodec {
        &self.codec
    }

    /// Number of leaves (`branch^layer`)
    pub fn action_space(&self) -> usize {
        self.codec.num_leaves()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Number of optimizer steps applied so far
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Joint action distribution `[N, branch^layer]` for `[N, state_dim]` or
    /// `[state_dim]` states. Does not touch the parameters.
    pub fn get_action_prob(&self, states: &Tensor) -> Result<Tensor> {
        let xs = self.prepare_states(states)?;
        self.layout.forward(&xs)
    }

    /// Same as [`get_action_prob`](Self::get_action_prob), as one `Vec` per state.
    pub fn action_probs(&self, states: &Tensor) -> Result<Vec<Vec<f32>>> {
        Ok(self.get_action_prob(states)?.to_vec2::<f32>()?)
    }

    /// Probability of `actions[n]` under state `n`.
    pub fn action_prob(&self, states: &Tensor, actions: &[usize]) -> Result<Vec<f32>> {
        let joint = self.get_action_prob(states)?;
        Ok(self.select(&joint, actions)?.to_vec1::<f32>()?)
    }

    /// REINFORCE surrogate loss under the current parameters, without updating.
    pub fn loss(&self, states: &Tensor, actions: &[usize], returns: &[f32]) -> Result<f32> {
        Ok(self
            .surrogate_loss(states, actions, returns)?
            .to_scalar::<f32>()?)
    }

    /// One Adam step on `-mean(return * ln(P(action | state) + eps))`.
    ///
    /// Returns the loss measured before the update.
    pub fn train(&mut self, states: &Tensor, actions: &[usize], returns: &[f32]) -> Result<f32> {
        let loss = self.surrogate_loss(states, actions, returns)?;
        let value = loss.to_scalar::<f32>()?;
        if !value.is_finite() {
            return Err(TreePgError::InvalidInput(format!(
                "non-finite policy loss {}",
                value
            )));
        }

        self.optimizer.backward_step(&loss)?;
        self.steps += 1;

        tracing::debug!(
            step = self.steps,
            batch = actions.len(),
            loss = value,
            "Policy update"
        );
        Ok(value)
    }

    /// The `k` most probable leaves among `[0, limit)` for a single state,
    /// most probable first. Ties keep the lower index first.
    pub fn top_k(&self, state: &Tensor, k: usize, limit: usize) -> Result<Vec<usize>> {
        let probs = self.action_probs(state)?;
        if probs.len() != 1 {
            return Err(TreePgError::InvalidInput(format!(
                "top_k expects one state, got {}",
                probs.len()
            )));
        }
        let row = &probs[0];
        let limit = limit.min(row.len());

        let mut leaves: Vec<usize> = (0..limit).collect();
        leaves.sort_by(|&a, &b| row[b].total_cmp(&row[a]));
        leaves.truncate(k);
        Ok(leaves)
    }

    /// Save parameters to a safetensors file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.save_parameters(path)
    }

    /// Load parameters from a safetensors file
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.load_parameters(path)
    }

    fn prepare_states(&self, states: &Tensor) -> Result<Tensor> {
        let states = match states.rank() {
            1 => states.unsqueeze(0)?,
            2 => states.clone(),
            rank => {
                return Err(TreePgError::InvalidInput(format!(
                    "states must be [N, {}], got rank {}",
                    self.config.state_dim, rank
                )))
            }
        };
        let (n, width) = states.dims2()?;
        if width != self.config.state_dim {
            return Err(TreePgError::InvalidInput(format!(
                "state width {} does not match state_dim {}",
                width, self.config.state_dim
            )));
        }
        if n == 0 {
            return Err(TreePgError::InvalidInput("empty state batch".into()));
        }
        let states = states.to_dtype(DType::F32)?.to_device(&self.device)?;
        if let Some(bad) = states
            .flatten_all()?
            .to_vec1::<f32>()?
            .into_iter()
            .find(|v| !v.is_finite())
        {
            return Err(TreePgError::InvalidInput(format!(
                "state contains non-finite value {}",
                bad
            )));
        }
        Ok(states)
    }

    /// Probabilities of the chosen leaves, `[N]`.
    fn select(&self, joint: &Tensor, actions: &[usize]) -> Result<Tensor> {
        let n = joint.dim(0)?;
        if actions.len() != n {
            return Err(TreePgError::InvalidInput(format!(
                "got {} actions for {} states",
                actions.len(),
                n
            )));
        }
        let mut indices = Vec::with_capacity(n);
        for &action in actions {
            self.codec.check(action)?;
            indices.push(action as i64);
        }
        let indices = Tensor::from_vec(indices, (n, 1), &self.device)?;
        Ok(joint.gather(&indices, 1)?.squeeze(1)?)
    }

    fn surrogate_loss(&self, states: &Tensor, actions: &[usize], returns: &[f32]) -> Result<Tensor> {
        let joint = self.get_action_prob(states)?;
        let chosen = self.select(&joint, actions)?;
        if returns.len() != actions.len() {
            return Err(TreePgError::InvalidInput(format!(
                "got {} returns for {} actions",
                returns.len(),
                actions.len()
            )));
        }
        if let Some(bad) = returns.iter().find(|r| !r.is_finite()) {
            return Err(TreePgError::InvalidInput(format!("non-finite return {}", bad)));
        }

        let returns = Tensor::from_slice(returns, returns.len(), &self.device)?;
        let log_prob = chosen.affine(1.0, LOG_EPSILON)?.log()?;
        Ok(returns.mul(&log_prob)?.mean_all()?.neg()?)
    }
}

impl HasVarMap for TreePolicy {
    fn var_map(&self) -> &VarMap {
        &self.vs
    }

    fn var_map_mut(&mut self) -> &mut VarMap {
        &mut self.vs
    }
}

impl Checkpointable for TreePolicy {
    fn save_state(&self) -> Result<Vec<u8>> {
        ModelSnapshot::capture(self.config.clone(), self.steps, &self.vs)?.to_bytes()
    }

    /// Restores parameters and step count. The snapshot must come from a
    /// policy with the same tree shape and sharing mode; Adam moments restart.
    fn load_state(&mut self, data: &[u8]) -> Result<()> {
        let snapshot = ModelSnapshot::<TreePolicyConfig>::from_bytes(data)?;
        let (ours, theirs) = (&self.config, &snapshot.config);
        if ours.layer != theirs.layer
            || ours.branch != theirs.branch
            || ours.state_dim != theirs.state_dim
            || ours.hidden_size != theirs.hidden_size
            || ours.sharing != theirs.sharing
        {
            return Err(TreePgError::InvalidInput(format!(
                "snapshot of a {}^{} {} tree (state_dim {}, hidden {}) does not fit this policy",
                theirs.branch, theirs.layer, theirs.sharing, theirs.state_dim, theirs.hidden_size
            )));
        }
        snapshot.restore_into(&self.vs, &self.device)?;
        self.steps = snapshot.steps;
        Ok(())
    }
}
