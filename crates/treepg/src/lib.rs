//! # treepg
//!
//! Hierarchical ("tree") policy gradient for session-based recommendation.
//!
//! ## Overview
//!
//! treepg provides:
//! - `TreePolicy` - a softmax policy over `branch^layer` actions factorized
//!   into a balanced tree of local `branch`-way decisions
//! - REINFORCE training of the joint distribution with Adam
//! - `LstmEncoder` - a recurrent state encoder over (embedding, rating) histories
//! - `SessionTrainer` - the session replay loop that feeds transitions to the policy
//! - Checkpointing and metric logging
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use treepg::prelude::*;
//!
//! let config = TreePolicyConfig {
//!     layer: 2,
//!     branch: 2,
//!     state_dim: 3,
//!     ..Default::default()
//! };
//! let mut policy = TreePolicy::new(config, Device::Cpu)?;
//!
//! let states = Tensor::new(&[[0.5f32, -0.2, 0.1]], &Device::Cpu)?;
//! let probs = policy.get_action_prob(&states)?; // [1, 4]
//! let loss = policy.train(&states, &[0], &[1.0])?;
//! ```

pub mod catalog;
pub mod checkpoint;
pub mod eval;
pub mod log;
pub mod policy;
pub mod synthetic;
pub mod training;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::catalog::{EmbeddingTable, Interaction, ItemIndex, Session};
    pub use crate::checkpoint::{CheckpointConfig, CheckpointManager, Checkpointable};
    pub use crate::eval::{evaluate_session, SessionMetrics};
    pub use crate::log::{CompositeLogger, ConsoleLogger, MetricLogger, NoOpLogger};
    pub use crate::policy::{
        ActionCodec, EncoderConfig, HasVarMap, LstmEncoder, SharingMode, StateEncoder,
        TreePolicy, TreePolicyConfig,
    };
    pub use crate::synthetic::{SyntheticConfig, SyntheticData};
    pub use crate::training::{
        discounted_returns, ExperimentConfig, RatingScale, SessionTrainer, TrainerConfig,
        TrainingReport, TransitionBatch,
    };
    pub use crate::{Result, TreePgError};

    pub use candle_core::{Device, Tensor};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum TreePgError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, TreePgError>;
