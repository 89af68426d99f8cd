//! LSTM state encoder.

use super::encoder::StateEncoder;
use super::init::seeded_init;
use super::HasVarMap;
use crate::checkpoint::{Checkpointable, ModelSnapshot};
use crate::{Result, TreePgError};
use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_nn::{AdamW, LSTMConfig, Linear, Optimizer, ParamsAdamW, VarBuilder, VarMap, LSTM, RNN};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Configuration for [`LstmEncoder`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Width of one history step (item embedding plus rating)
    pub input_dim: usize,
    /// Steps kept per history
    pub max_seq_length: usize,
    /// LSTM hidden size, which is also the state width
    pub hidden_size: usize,
    /// Adam learning rate for rating pre-training
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            input_dim: 129,
            max_seq_length: 32,
            hidden_size: 64,
            learning_rate: 1e-4,
            seed: 1,
        }
    }
}

impl EncoderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.input_dim == 0 || self.max_seq_length == 0 || self.hidden_size == 0 {
            return Err(TreePgError::InvalidConfig(format!(
                "encoder dimensions must be positive: input {}, steps {}, hidden {}",
                self.input_dim, self.max_seq_length, self.hidden_size
            )));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(TreePgError::InvalidConfig(format!(
                "encoder learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Single-layer LSTM over (embedding, rating) histories.
///
/// The state of a history is the hidden output after its last real step. A
/// linear head on top predicts the next rating for pre-training.
pub struct LstmEncoder {
    config: EncoderConfig,
    vs: VarMap,
    lstm: LSTM,
    rating_head: Linear,
    optimizer: AdamW,
    device: Device,
    steps: u64,
}

impl LstmEncoder {
    /// Create a new encoder with parameters drawn from `config.seed`
    pub fn new(config: EncoderConfig, device: Device) -> Result<Self> {
        config.validate()?;

        let vs = VarMap::new();
        let vb = VarBuilder::from_varmap(&vs, DType::F32, &device);
        let lstm = candle_nn::lstm(
            config.input_dim,
            config.hidden_size,
            LSTMConfig::default(),
            vb.pp("lstm"),
        )?;
        let rating_head = candle_nn::linear(config.hidden_size, 1, vb.pp("rating_head"))?;

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        seeded_init(&vs, &mut rng, &device)?;

        let optimizer = AdamW::new(
            vs.all_vars(),
            ParamsAdamW {
                lr: config.learning_rate,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;

        Ok(Self {
            config,
            vs,
            lstm,
            rating_head,
            optimizer,
            device,
            steps: 0,
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Mean squared error of the next-rating prediction, without updating.
    pub fn rating_loss(&self, padded: &Tensor, lengths: &[usize], targets: &[f32]) -> Result<f32> {
        Ok(self
            .mse(padded, lengths, targets)?
            .to_scalar::<f32>()?)
    }

    /// One Adam step on the next-rating regression. Returns the pre-update MSE.
    pub fn train(&mut self, padded: &Tensor, lengths: &[usize], targets: &[f32]) -> Result<f32> {
        let loss = self.mse(padded, lengths, targets)?;
        let value = loss.to_scalar::<f32>()?;
        self.optimizer.backward_step(&loss)?;
        self.steps += 1;
        tracing::debug!(step = self.steps, mse = value, "Encoder pre-training step");
        Ok(value)
    }

    fn check_batch(&self, padded: &Tensor, lengths: &[usize]) -> Result<()> {
        let (n, steps, width) = padded.dims3().map_err(|_| {
            TreePgError::InvalidInput(format!(
                "padded histories must be [N, {}, {}], got {:?}",
                self.config.max_seq_length,
                self.config.input_dim,
                padded.dims()
            ))
        })?;
        if steps != self.config.max_seq_length || width != self.config.input_dim {
            return Err(TreePgError::InvalidInput(format!(
                "padded histories must be [N, {}, {}], got {:?}",
                self.config.max_seq_length,
                self.config.input_dim,
                padded.dims()
            )));
        }
        if n == 0 || lengths.len() != n {
            return Err(TreePgError::InvalidInput(format!(
                "got {} lengths for {} histories",
                lengths.len(),
                n
            )));
        }
        if let Some(&bad) = lengths
            .iter()
            .find(|&&len| len == 0 || len > self.config.max_seq_length)
        {
            return Err(TreePgError::InvalidInput(format!(
                "history length {} outside [1, {}]",
                bad, self.config.max_seq_length
            )));
        }
        Ok(())
    }

    fn hidden(&self, padded: &Tensor, lengths: &[usize]) -> Result<Tensor> {
        self.check_batch(padded, lengths)?;
        let padded = padded.to_dtype(DType::F32)?.to_device(&self.device)?;
        let states = self.lstm.seq(&padded)?;

        let rows = lengths
            .iter()
            .enumerate()
            .map(|(n, &len)| Ok(states[len - 1].h().i(n)?))
            .collect::<Result<Vec<_>>>()?;
        Ok(Tensor::stack(&rows, 0)?)
    }

    fn mse(&self, padded: &Tensor, lengths: &[usize], targets: &[f32]) -> Result<Tensor> {
        if targets.len() != lengths.len() {
            return Err(TreePgError::InvalidInput(format!(
                "got {} targets for {} histories",
                targets.len(),
                lengths.len()
            )));
        }
        let hidden = self.hidden(padded, lengths)?;
        let predicted = self.rating_head.forward(&hidden)?.squeeze(1)?;
        let targets = Tensor::from_slice(targets, targets.len(), &self.device)?;
        Ok(candle_nn::loss::mse(&predicted, &targets)?)
    }
}

impl StateEncoder for LstmEncoder {
    fn input_dim(&self) -> usize {
        self.config.input_dim
    }

    fn max_seq_length(&self) -> usize {
        self.config.max_seq_length
    }

    fn state_dim(&self) -> usize {
        self.config.hidden_size
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn encode(&self, padded: &Tensor, lengths: &[usize]) -> Result<Tensor> {
        self.hidden(padded, lengths)
    }

    fn fit(&mut self, padded: &Tensor, lengths: &[usize], targets: &[f32]) -> Result<Option<f32>> {
        self.train(padded, lengths, targets).map(Some)
    }
}

impl HasVarMap for LstmEncoder {
    fn var_map(&self) -> &VarMap {
        &self.vs
    }

    fn var_map_mut(&mut self) -> &mut VarMap {
        &mut self.vs
    }
}

impl Checkpointable for LstmEncoder {
    fn save_state(&self) -> Result<Vec<u8>> {
        ModelSnapshot::capture(self.config.clone(), self.steps, &self.vs)?.to_bytes()
    }

    fn load_state(&mut self, data: &[u8]) -> Result<()> {
        let snapshot = ModelSnapshot::<EncoderConfig>::from_bytes(data)?;
        let (ours, theirs) = (&self.config, &snapshot.config);
        if ours.input_dim != theirs.input_dim
            || ours.max_seq_length != theirs.max_seq_length
            || ours.hidden_size != theirs.hidden_size
        {
            return Err(TreePgError::InvalidInput(format!(
                "snapshot of an encoder with input {}, steps {}, hidden {} does not fit this encoder",
                theirs.input_dim, theirs.max_seq_length, theirs.hidden_size
            )));
        }
        snapshot.restore_into(&self.vs, &self.device)?;
        self.steps = snapshot.steps;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> LstmEncoder {
        let config = EncoderConfig {
            input_dim: 3,
            max_seq_length: 4,
            hidden_size: 5,
            learning_rate: 1e-2,
            seed: 11,
        };
        LstmEncoder::new(config, Device::Cpu).unwrap()
    }

    fn history(len: usize) -> Vec<Vec<f32>> {
        (0..len)
            .map(|t| vec![t as f32 * 0.1, 1.0 - t as f32 * 0.2, 0.5])
            .collect()
    }

    #[test]
    fn test_pad_batch_shapes_and_truncation() {
        let encoder = encoder();
        let short = history(2);
        let long = history(6);
        let (padded, lengths) = encoder.pad_batch(&[short.as_slice(), long.as_slice()]).unwrap();

        assert_eq!(padded.dims(), &[2, 4, 3]);
        assert_eq!(lengths, vec![2, 4]);

        let rows = padded.to_vec3::<f32>().unwrap();
        assert_eq!(rows[0][2], vec![0.0, 0.0, 0.0]);
        // most recent steps of the long history are kept
        assert_eq!(rows[1][0], long[2]);
        assert_eq!(rows[1][3], long[5]);
    }

    #[test]
    fn test_pad_batch_rejects_bad_histories() {
        let encoder = encoder();
        let empty: Vec<Vec<f32>> = Vec::new();
        assert!(encoder.pad_batch(&[empty.as_slice()]).is_err());

        let wide = vec![vec![0.0; 4]];
        assert!(encoder.pad_batch(&[wide.as_slice()]).is_err());
    }

    #[test]
    fn test_encode_ignores_padding() {
        let encoder = encoder();
        let h = history(2);
        let (padded, lengths) = encoder.pad_batch(&[h.as_slice()]).unwrap();
        let state = encoder.encode(&padded, &lengths).unwrap();
        assert_eq!(state.dims(), &[1, 5]);

        // garbage after the true length must not change the state
        let mut dirty = padded.to_vec3::<f32>().unwrap();
        dirty[0][3] = vec![9.0, 9.0, 9.0];
        let flat: Vec<f32> = dirty.into_iter().flatten().flatten().collect();
        let dirty = Tensor::from_vec(flat, (1, 4, 3), &Device::Cpu).unwrap();
        let again = encoder.encode(&dirty, &lengths).unwrap();
        assert_eq!(state.to_vec2::<f32>().unwrap(), again.to_vec2::<f32>().unwrap());
    }

    #[test]
    fn test_encode_rejects_bad_lengths() {
        let encoder = encoder();
        let h = history(2);
        let (padded, _) = encoder.pad_batch(&[h.as_slice()]).unwrap();
        assert!(encoder.encode(&padded, &[0]).is_err());
        assert!(encoder.encode(&padded, &[5]).is_err());
        assert!(encoder.encode(&padded, &[1, 1]).is_err());
    }

    #[test]
    fn test_pretraining_reduces_rating_error() {
        let mut encoder = encoder();
        let histories: Vec<Vec<Vec<f32>>> = (1..=4).map(history).collect();
        let refs: Vec<&[Vec<f32>]> = histories.iter().map(|h| h.as_slice()).collect();
        let (padded, lengths) = encoder.pad_batch(&refs).unwrap();
        let targets = [0.8f32, 0.2, -0.4, 0.6];

        let first = encoder.train(&padded, &lengths, &targets).unwrap();
        for _ in 0..50 {
            encoder.train(&padded, &lengths, &targets).unwrap();
        }
        let last = encoder.rating_loss(&padded, &lengths, &targets).unwrap();
        assert!(last < first, "mse went from {} to {}", first, last);
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let mut trained = encoder();
        let h = history(3);
        let (padded, lengths) = trained.pad_batch(&[h.as_slice()]).unwrap();
        trained.train(&padded, &lengths, &[1.0]).unwrap();

        let mut fresh = encoder();
        fresh.load_state(&trained.save_state().unwrap()).unwrap();
        assert_eq!(
            trained.encode(&padded, &lengths).unwrap().to_vec2::<f32>().unwrap(),
            fresh.encode(&padded, &lengths).unwrap().to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn test_checkpoint_rejects_other_sequence_length() {
        let bytes = encoder().save_state().unwrap();
        let mut longer = LstmEncoder::new(
            EncoderConfig {
                max_seq_length: 8,
                ..encoder().config().clone()
            },
            Device::Cpu,
        )
        .unwrap();
        assert!(matches!(
            longer.load_state(&bytes),
            Err(TreePgError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_safetensors_parameters_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encoder.safetensors");
        let mut trained = encoder();
        let h = history(3);
        let (padded, lengths) = trained.pad_batch(&[h.as_slice()]).unwrap();
        trained.train(&padded, &lengths, &[1.0]).unwrap();
        trained.save_parameters(&path).unwrap();

        let mut fresh = encoder();
        fresh.load_parameters(&path).unwrap();
        assert_eq!(
            trained.encode(&padded, &lengths).unwrap().to_vec2::<f32>().unwrap(),
            fresh.encode(&padded, &lengths).unwrap().to_vec2::<f32>().unwrap()
        );
    }
}
