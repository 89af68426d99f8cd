//! State encoder interface.

use crate::{Result, TreePgError};
use candle_core::{Device, Tensor};

/// Turns padded interaction histories into fixed-width state vectors.
pub trait StateEncoder {
    /// Width of one history step.
    fn input_dim(&self) -> usize;

    /// Number of steps in a padded history.
    fn max_seq_length(&self) -> usize;

    /// Width of the produced state vectors.
    fn state_dim(&self) -> usize;

    fn device(&self) -> &Device;

    /// Encode `[N, max_seq_length, input_dim]` histories with their true lengths
    /// into `[N, state_dim]` states.
    fn encode(&self, padded: &Tensor, lengths: &[usize]) -> Result<Tensor>;

    /// Supervised pre-training on next-rating targets. Returns the loss if the
    /// encoder is trainable.
    fn fit(&mut self, _padded: &Tensor, _lengths: &[usize], _targets: &[f32]) -> Result<Option<f32>> {
        Ok(None)
    }

    /// Zero-pad histories to `max_seq_length`, keeping the most recent steps of
    /// longer histories.
    fn pad_batch(&self, histories: &[&[Vec<f32>]]) -> Result<(Tensor, Vec<usize>)> {
        let (max_len, width) = (self.max_seq_length(), self.input_dim());
        let mut data = vec![0.0f32; histories.len() * max_len * width];
        let mut lengths = Vec::with_capacity(histories.len());

        for (row, history) in histories.iter().enumerate() {
            if history.is_empty() {
                return Err(TreePgError::InvalidInput(format!(
                    "history {} is empty",
                    row
                )));
            }
            let kept = &history[history.len().saturating_sub(max_len)..];
            for (t, step) in kept.iter().enumerate() {
                if step.len() != width {
                    return Err(TreePgError::InvalidInput(format!(
                        "history step has width {}, expected {}",
                        step.len(),
                        width
                    )));
                }
                let offset = (row * max_len + t) * width;
                data[offset..offset + width].copy_from_slice(step);
            }
            lengths.push(kept.len());
        }

        let padded = Tensor::from_vec(data, (histories.len(), max_len, width), self.device())?;
        Ok((padded, lengths))
    }
}
