//! Training: returns, transition batches, configuration and the session loop.

mod batch;
mod config;
mod returns;
mod trainer;

pub use batch::TransitionBatch;
pub use config::{ExperimentConfig, TrainerConfig};
pub use returns::{discounted_returns, RatingScale};
pub use trainer::{SessionTrainer, TrainingReport};
