//! Snapshot types and the `Checkpointable` trait.

use crate::{Result, TreePgError};
use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Trait for components that can be saved and restored.
///
/// # Example
///
/// ```ignore
/// let bytes = policy.save_state()?;
/// let mut restored = TreePolicy::new(config, Device::Cpu)?;
/// restored.load_state(&bytes)?;
/// ```
pub trait Checkpointable {
    /// Serialize the component's state to bytes.
    fn save_state(&self) -> Result<Vec<u8>>;

    /// Restore the component's state from bytes.
    fn load_state(&mut self, data: &[u8]) -> Result<()>;
}

/// Values of one parameter tensor.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ParameterSnapshot {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

/// Configuration plus every parameter of a model, keyed by variable name.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ModelSnapshot<C> {
    pub config: C,
    /// Number of optimizer steps taken when the snapshot was made
    pub steps: u64,
    pub parameters: BTreeMap<String, ParameterSnapshot>,
    /// treepg version that wrote the snapshot
    pub version: String,
}

impl<C> ModelSnapshot<C>
where
    C: Serialize + for<'de> Deserialize<'de>,
{
    /// Capture the current values of every variable in `varmap`.
    pub fn capture(config: C, steps: u64, varmap: &VarMap) -> Result<Self> {
        let vars = varmap
            .data()
            .lock()
            .map_err(|_| TreePgError::InvalidInput("parameter store poisoned".into()))?;

        let mut parameters = BTreeMap::new();
        for (name, var) in vars.iter() {
            parameters.insert(
                name.clone(),
                ParameterSnapshot {
                    shape: var.dims().to_vec(),
                    values: var.flatten_all()?.to_vec1::<f32>()?,
                },
            );
        }

        Ok(Self {
            config,
            steps,
            parameters,
            version: crate::VERSION.to_string(),
        })
    }

    /// Write the snapshot values back into `varmap`.
    ///
    /// The variable names and shapes must match exactly.
    pub fn restore_into(&self, varmap: &VarMap, device: &Device) -> Result<()> {
        let vars = varmap
            .data()
            .lock()
            .map_err(|_| TreePgError::InvalidInput("parameter store poisoned".into()))?;

        if vars.len() != self.parameters.len() {
            return Err(TreePgError::InvalidInput(format!(
                "snapshot has {} parameters, model has {}",
                self.parameters.len(),
                vars.len()
            )));
        }

        // Validate everything before touching any variable.
        for (name, var) in vars.iter() {
            let snapshot = self.parameters.get(name).ok_or_else(|| {
                TreePgError::InvalidInput(format!("snapshot is missing parameter '{}'", name))
            })?;
            let numel: usize = snapshot.shape.iter().product();
            if snapshot.shape != var.dims() || snapshot.values.len() != numel {
                return Err(TreePgError::InvalidInput(format!(
                    "parameter '{}' has shape {:?}, snapshot has {:?}",
                    name,
                    var.dims(),
                    snapshot.shape
                )));
            }
        }

        for (name, var) in vars.iter() {
            let snapshot = &self.parameters[name];
            var.set(&Tensor::from_slice(
                &snapshot.values,
                snapshot.shape.as_slice(),
                device,
            )?)?;
        }

        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}
