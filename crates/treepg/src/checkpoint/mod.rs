//! Checkpointing of policy and encoder parameters.
//!
//! Provides:
//! - `Checkpointable` trait for components that can be saved/restored
//! - `ModelSnapshot` for configuration + parameter serialization
//! - `CheckpointManager` for periodic saves with rotation

mod manager;
mod state;

pub use manager::{CheckpointConfig, CheckpointManager};
pub use state::{Checkpointable, ModelSnapshot, ParameterSnapshot};
