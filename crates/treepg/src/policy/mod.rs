//! Policy networks.
//!
//! Provides:
//! - `TreePolicy` - hierarchical softmax policy over `branch^layer` leaves
//! - `ActionCodec` - leaf index <-> branch digit conversion
//! - `StateEncoder` / `LstmEncoder` - history to state encoding

mod codec;
mod config;
mod encoder;
mod init;
mod lstm;
mod node;
mod tree;

pub use codec::ActionCodec;
pub use config::{SharingMode, TreePolicyConfig};
pub use encoder::StateEncoder;
pub use init::seeded_init;
pub use lstm::{EncoderConfig, LstmEncoder};
pub use tree::TreePolicy;

use crate::Result;
use candle_nn::VarMap;
use std::path::Path;

/// Trait for models that keep their parameters in a `VarMap`
pub trait HasVarMap {
    fn var_map(&self) -> &VarMap;

    fn var_map_mut(&mut self) -> &mut VarMap;

    /// Write every parameter to a safetensors file
    fn save_parameters(&self, path: impl AsRef<Path>) -> Result<()>
    where
        Self: Sized,
    {
        self.var_map().save(path)?;
        Ok(())
    }

    /// Overwrite every parameter from a safetensors file
    fn load_parameters(&mut self, path: impl AsRef<Path>) -> Result<()>
    where
        Self: Sized,
    {
        self.var_map_mut().load(path)?;
        Ok(())
    }

    /// Total number of scalar parameters
    fn num_parameters(&self) -> usize {
        self.var_map()
            .all_vars()
            .iter()
            .map(|v| v.elem_count())
            .sum()
    }
}
